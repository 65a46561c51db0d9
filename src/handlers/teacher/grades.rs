use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::{catalog::find_enrollment, teacher::owned_course},
    models::{
        course::EnrollmentStatus,
        grade::{AssignmentScoreRequest, RosterEntry},
    },
    services::{attendance, grades},
    utils::jwt::CurrentUser,
};

/// Gradebook of the course, recomputed for every active student.
pub async fn course_roster(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    owned_course(&mut tx, course_id, &user).await?;

    let students = attendance::enrolled_students(&mut tx, course_id).await?;
    let mut roster = Vec::with_capacity(students.len());
    for student in students {
        let grade = grades::recompute(&mut tx, student.id, course_id, now).await?;
        roster.push(RosterEntry { student, grade });
    }

    tx.commit().await?;
    Ok(Json(roster))
}

/// Enters the assignment component for one enrolled student.
pub async fn set_assignment_score(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path((course_id, student_id)): Path<(i64, i64)>,
    Json(payload): Json<AssignmentScoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let mut tx = pool.begin().await?;
    owned_course(&mut tx, course_id, &user).await?;

    match find_enrollment(&mut tx, student_id, course_id).await? {
        Some(e) if e.status != EnrollmentStatus::Dropped => {}
        _ => return Err(AppError::NotFound("Student is not enrolled in this course".to_string())),
    }

    let grade = grades::set_assignment_score(
        &mut tx,
        student_id,
        course_id,
        payload.assignment_score,
        Utc::now(),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        "Teacher {} set assignment score {} for student {} in course {}",
        user.id,
        payload.assignment_score,
        student_id,
        course_id
    );
    Ok(Json(grade))
}
