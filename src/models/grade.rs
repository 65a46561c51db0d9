use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::models::user::StudentRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "letter_grade")]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

/// Represents the 'grades' table: one row per (student, course).
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Grade {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub quiz_score: f64,
    pub attendance_score: f64,
    /// Entered manually by the course teacher.
    pub assignment_score: f64,
    pub total_score: f64,
    pub letter_grade: LetterGrade,
    pub updated_at: DateTime<Utc>,
}

/// Gradebook entry for one enrollment.
#[derive(Debug, Serialize, ToSchema)]
pub struct GradebookEntry {
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub progress: i32,
    pub grade: Grade,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RosterEntry {
    pub student: StudentRef,
    pub grade: Grade,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AssignmentScoreRequest {
    #[validate(range(min = 0.0, max = 100.0))]
    pub assignment_score: f64,
}
