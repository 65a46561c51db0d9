// src/handlers/student.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    handlers::catalog::{find_course, find_enrollment},
    models::{
        attendance::{Attendance, CourseAttendanceSummary, SessionAttendance},
        course::EnrollmentStatus,
        grade::GradebookEntry,
    },
    services::{attendance, grades, quiz_engine},
    utils::jwt::CurrentUser,
};

#[derive(FromRow)]
struct EnrolledCourse {
    course_id: i64,
    code: String,
    name: String,
    progress: i32,
}

/// Gradebook of the caller, recomputed on every view.
pub async fn my_grades(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    user.ensure_student("Only students have a gradebook", "/")?;
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    quiz_engine::expire_student_attempts(&mut tx, user.id, now).await?;

    let courses = sqlx::query_as::<_, EnrolledCourse>(
        r#"
        SELECT c.id AS course_id, c.code, c.name, e.progress
        FROM enrollments e
        JOIN courses c ON c.id = e.course_id
        WHERE e.student_id = $1 AND e.status <> 'dropped'
        ORDER BY c.code
        "#,
    )
    .bind(user.id)
    .fetch_all(&mut *tx)
    .await?;

    let mut entries = Vec::with_capacity(courses.len());
    for course in courses {
        let grade = grades::recompute(&mut tx, user.id, course.course_id, now).await?;
        entries.push(GradebookEntry {
            course_id: course.course_id,
            course_code: course.code,
            course_name: course.name,
            progress: course.progress,
            grade,
        });
    }

    tx.commit().await?;
    Ok(Json(entries))
}

/// Attendance summary for every active enrollment.
pub async fn my_attendance(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let summaries = attendance::course_summaries(&mut conn, user.id).await?;
    Ok(Json(summaries))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseAttendanceDetail {
    pub summary: CourseAttendanceSummary,
    pub sessions: Vec<SessionAttendance>,
}

/// Session-by-session marks in one course.
pub async fn my_course_attendance(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let course = find_course(&mut conn, course_id).await?;

    match find_enrollment(&mut conn, user.id, course_id).await? {
        Some(e) if e.status != EnrollmentStatus::Dropped => {}
        _ => {
            return Err(AppError::forbidden_to(
                "You are not enrolled in this course",
                "/my/attendance",
            ));
        }
    }

    let sessions = attendance::course_sessions(&mut conn, course_id).await?;
    let marks = sqlx::query_as::<_, Attendance>(
        r#"
        SELECT a.id, a.session_id, a.student_id, a.status, a.notes, a.marked_at
        FROM attendances a
        JOIN class_sessions s ON s.id = a.session_id
        WHERE a.student_id = $1 AND s.course_id = $2
        "#,
    )
    .bind(user.id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut counts = attendance::StatusCounts::default();
    for mark in &marks {
        counts.add(mark.status, 1);
    }
    let total_sessions = sessions.len() as i64;

    let sessions = sessions
        .into_iter()
        .map(|session| {
            let attendance = marks.iter().find(|m| m.session_id == session.id).cloned();
            SessionAttendance { session, attendance }
        })
        .collect();

    Ok(Json(CourseAttendanceDetail {
        summary: CourseAttendanceSummary {
            course_id,
            course_code: course.code,
            course_name: course.name,
            total_sessions,
            present: counts.present,
            late: counts.late,
            absent: counts.absent,
            excused: counts.excused,
            percentage: attendance::attendance_percentage(&counts, total_sessions),
        },
        sessions,
    }))
}
