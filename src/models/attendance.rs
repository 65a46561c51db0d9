// src/models/attendance.rs

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::user::StudentRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "session_type", rename_all = "snake_case")]
pub enum SessionType {
    Lecture,
    Seminar,
    Lab,
    Practice,
}

/// Mark recorded for one student at one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attendance_status", rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Late and excused marks count as attending.
    pub fn counts_as_attending(self) -> bool {
        match self {
            AttendanceStatus::Present | AttendanceStatus::Late | AttendanceStatus::Excused => true,
            AttendanceStatus::Absent => false,
        }
    }
}

/// Represents the 'class_sessions' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Session {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub session_type: SessionType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub created_at: DateTime<Utc>,
}

/// Represents the 'attendances' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Attendance {
    pub id: i64,
    pub session_id: i64,
    pub student_id: i64,
    pub status: AttendanceStatus,
    pub notes: String,
    pub marked_at: DateTime<Utc>,
}

/// Per-course summary for the student attendance page.
#[derive(Debug, Serialize, ToSchema)]
pub struct CourseAttendanceSummary {
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub total_sessions: i64,
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused: i64,
    pub percentage: i32,
}

/// One session with the student's mark (if any).
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionAttendance {
    pub session: Session,
    pub attendance: Option<Attendance>,
}

/// Row of the take-attendance sheet.
#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceSheetRow {
    pub student: StudentRef,
    pub attendance: Option<Attendance>,
}

/// Row of the teacher's course attendance report.
#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceReportRow {
    pub student: StudentRef,
    /// Aligned with `AttendanceReport::sessions`; `None` where unmarked.
    pub statuses: Vec<Option<AttendanceStatus>>,
    pub present_count: i64,
    pub total: i64,
    pub percentage: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceReport {
    pub course_id: i64,
    pub sessions: Vec<Session>,
    pub rows: Vec<AttendanceReportRow>,
}

/// DTO for creating or updating a session.
#[derive(Debug, Deserialize, Validate)]
pub struct SessionRequest {
    #[validate(length(max = 200))]
    #[serde(default)]
    pub title: String,
    pub session_type: Option<SessionType>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl SessionRequest {
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };
        if self.end_time <= self.start_time {
            errors.add(
                "end_time",
                ValidationError::new("end_before_start")
                    .with_message("end_time must be after start_time".into()),
            );
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AttendanceMark {
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: String,
}

/// DTO for taking attendance. Key: student id.
/// Enrolled students missing from the map are marked absent.
#[derive(Debug, Deserialize)]
pub struct TakeAttendanceRequest {
    #[serde(default)]
    pub marks: HashMap<i64, AttendanceMark>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_and_excused_count_as_attending() {
        assert!(AttendanceStatus::Present.counts_as_attending());
        assert!(AttendanceStatus::Late.counts_as_attending());
        assert!(AttendanceStatus::Excused.counts_as_attending());
        assert!(!AttendanceStatus::Absent.counts_as_attending());
    }

    #[test]
    fn session_must_end_after_start() {
        let req = SessionRequest {
            title: "Intro".to_string(),
            session_type: None,
            date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        assert!(req.check().is_err());
    }
}
