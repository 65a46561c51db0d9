// src/services/attendance.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection};

use crate::{
    error::AppError,
    models::{
        attendance::{
            Attendance, AttendanceMark, AttendanceReport, AttendanceReportRow, AttendanceStatus,
            CourseAttendanceSummary, Session,
        },
        user::StudentRef,
    },
};

pub const SESSION_COLUMNS: &str =
    "id, course_id, title, session_type, date, start_time, end_time, created_at";

/// Tally of one student's marks in one course.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusCounts {
    pub present: i64,
    pub late: i64,
    pub absent: i64,
    pub excused: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus, n: i64) {
        match status {
            AttendanceStatus::Present => self.present += n,
            AttendanceStatus::Late => self.late += n,
            AttendanceStatus::Absent => self.absent += n,
            AttendanceStatus::Excused => self.excused += n,
        }
    }

    pub fn attending(&self) -> i64 {
        self.present + self.late + self.excused
    }
}

/// `floor(100 * attending / total_sessions)`. Sessions without a mark
/// count against the student through the denominator.
pub fn attendance_percentage(counts: &StatusCounts, total_sessions: i64) -> i32 {
    if total_sessions <= 0 {
        return 0;
    }
    ((100 * counts.attending().min(total_sessions)) / total_sessions) as i32
}

pub async fn session_count(conn: &mut PgConnection, course_id: i64) -> Result<i64, AppError> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM class_sessions WHERE course_id = $1")
        .bind(course_id)
        .fetch_one(&mut *conn)
        .await?)
}

#[derive(FromRow)]
struct StatusCountRow {
    status: AttendanceStatus,
    n: i64,
}

pub async fn student_counts(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<StatusCounts, AppError> {
    let rows = sqlx::query_as::<_, StatusCountRow>(
        r#"
        SELECT a.status, COUNT(*) AS n
        FROM attendances a
        JOIN class_sessions s ON s.id = a.session_id
        WHERE a.student_id = $1 AND s.course_id = $2
        GROUP BY a.status
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut counts = StatusCounts::default();
    for row in rows {
        counts.add(row.status, row.n);
    }
    Ok(counts)
}

/// Attendance percentage of one student in one course.
pub async fn student_percentage(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<i32, AppError> {
    let total = session_count(conn, course_id).await?;
    let counts = student_counts(conn, student_id, course_id).await?;
    Ok(attendance_percentage(&counts, total))
}

#[derive(FromRow)]
struct EnrolledCourseRow {
    course_id: i64,
    code: String,
    name: String,
}

/// One summary per active enrollment of the student.
pub async fn course_summaries(
    conn: &mut PgConnection,
    student_id: i64,
) -> Result<Vec<CourseAttendanceSummary>, AppError> {
    let courses = sqlx::query_as::<_, EnrolledCourseRow>(
        r#"
        SELECT c.id AS course_id, c.code, c.name
        FROM enrollments e
        JOIN courses c ON c.id = e.course_id
        WHERE e.student_id = $1 AND e.status = 'active'
        ORDER BY c.code
        "#,
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut summaries = Vec::with_capacity(courses.len());
    for course in courses {
        let total_sessions = session_count(conn, course.course_id).await?;
        let counts = student_counts(conn, student_id, course.course_id).await?;
        summaries.push(CourseAttendanceSummary {
            course_id: course.course_id,
            course_code: course.code,
            course_name: course.name,
            total_sessions,
            present: counts.present,
            late: counts.late,
            absent: counts.absent,
            excused: counts.excused,
            percentage: attendance_percentage(&counts, total_sessions),
        });
    }
    Ok(summaries)
}

pub async fn course_sessions(conn: &mut PgConnection, course_id: i64) -> Result<Vec<Session>, AppError> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM class_sessions WHERE course_id = $1 ORDER BY date, start_time, id"
    );
    Ok(sqlx::query_as::<_, Session>(&sql)
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?)
}

pub async fn enrolled_students(conn: &mut PgConnection, course_id: i64) -> Result<Vec<StudentRef>, AppError> {
    Ok(sqlx::query_as::<_, StudentRef>(
        r#"
        SELECT u.id, u.username, u.first_name, u.last_name
        FROM enrollments e
        JOIN users u ON u.id = e.student_id
        WHERE e.course_id = $1 AND e.status = 'active'
        ORDER BY u.last_name, u.first_name, u.username
        "#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?)
}

/// Upserts one mark for each actively enrolled student; students missing
/// from `marks` get `absent`. Marks for students not enrolled are ignored.
pub async fn take_attendance(
    conn: &mut PgConnection,
    session: &Session,
    marks: &HashMap<i64, AttendanceMark>,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let students = enrolled_students(conn, session.course_id).await?;

    for student in &students {
        let (status, notes) = match marks.get(&student.id) {
            Some(mark) => (mark.status, mark.notes.as_str()),
            None => (AttendanceStatus::Absent, ""),
        };
        sqlx::query(
            r#"
            INSERT INTO attendances (session_id, student_id, status, notes, marked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, student_id)
            DO UPDATE SET status = EXCLUDED.status, notes = EXCLUDED.notes, marked_at = EXCLUDED.marked_at
            "#,
        )
        .bind(session.id)
        .bind(student.id)
        .bind(status)
        .bind(notes)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }

    tracing::info!("Attendance taken for session {}: {} students", session.id, students.len());
    Ok(students.len())
}

pub async fn session_marks(conn: &mut PgConnection, session_id: i64) -> Result<Vec<Attendance>, AppError> {
    Ok(sqlx::query_as::<_, Attendance>(
        "SELECT id, session_id, student_id, status, notes, marked_at FROM attendances WHERE session_id = $1",
    )
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await?)
}

/// Student-by-session matrix for the course report.
pub async fn course_report(conn: &mut PgConnection, course_id: i64) -> Result<AttendanceReport, AppError> {
    let sessions = course_sessions(conn, course_id).await?;
    let students = enrolled_students(conn, course_id).await?;

    let marks = sqlx::query_as::<_, Attendance>(
        r#"
        SELECT a.id, a.session_id, a.student_id, a.status, a.notes, a.marked_at
        FROM attendances a
        JOIN class_sessions s ON s.id = a.session_id
        WHERE s.course_id = $1
        "#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let lookup: HashMap<(i64, i64), AttendanceStatus> = marks
        .into_iter()
        .map(|m| ((m.student_id, m.session_id), m.status))
        .collect();

    let total = sessions.len() as i64;
    let rows = students
        .into_iter()
        .map(|student| {
            let statuses: Vec<Option<AttendanceStatus>> = sessions
                .iter()
                .map(|s| lookup.get(&(student.id, s.id)).copied())
                .collect();
            let mut counts = StatusCounts::default();
            for status in statuses.iter().flatten() {
                counts.add(*status, 1);
            }
            AttendanceReportRow {
                student,
                statuses,
                present_count: counts.attending(),
                total,
                percentage: attendance_percentage(&counts, total),
            }
        })
        .collect();

    Ok(AttendanceReport {
        course_id,
        sessions,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(present: i64, late: i64, absent: i64, excused: i64) -> StatusCounts {
        StatusCounts {
            present,
            late,
            absent,
            excused,
        }
    }

    #[test]
    fn late_counts_as_attending() {
        assert_eq!(attendance_percentage(&counts(6, 2, 2, 0), 10), 80);
    }

    #[test]
    fn unmarked_sessions_count_against_the_student() {
        // 4 marks recorded out of 10 sessions.
        assert_eq!(attendance_percentage(&counts(3, 0, 0, 1), 10), 40);
    }

    #[test]
    fn no_sessions_means_zero() {
        assert_eq!(attendance_percentage(&counts(0, 0, 0, 0), 0), 0);
    }

    #[test]
    fn percentage_is_floored() {
        assert_eq!(attendance_percentage(&counts(2, 0, 1, 0), 3), 66);
    }

    #[test]
    fn add_tallies_by_status() {
        let mut c = StatusCounts::default();
        c.add(AttendanceStatus::Present, 2);
        c.add(AttendanceStatus::Excused, 1);
        c.add(AttendanceStatus::Absent, 4);
        assert_eq!(c.attending(), 3);
        assert_eq!(c.absent, 4);
    }
}
