// src/handlers/analytics.rs

use axum::{Json, extract::State, response::IntoResponse};
use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use utoipa::ToSchema;

use crate::{
    config::RECENT_ACTIVITY_LIMIT,
    error::AppError,
    models::{
        activity::{ActivityCount, ActivityLog},
        grade::LetterGrade,
    },
    services::{activity, attendance, grades, quiz_engine},
    utils::jwt::CurrentUser,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseStat {
    pub course_id: i64,
    pub course_code: String,
    pub course_name: String,
    pub progress: i32,
    pub total_score: f64,
    pub letter_grade: LetterGrade,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StudentStats {
    pub total_courses: i64,
    pub completed_lessons: i64,
    pub quizzes_taken: i64,
    pub avg_quiz_score: f64,
    /// Attending marks over all sessions of the active courses.
    pub attendance_percentage: i32,
    pub recent_activities: Vec<ActivityLog>,
    /// Last seven days, by type.
    pub weekly_activity: Vec<ActivityCount>,
    pub courses: Vec<CourseStat>,
}

#[derive(FromRow)]
struct ActiveCourse {
    course_id: i64,
    code: String,
    name: String,
    progress: i32,
}

#[derive(FromRow)]
struct QuizTotals {
    taken: i64,
    avg_score: f64,
}

/// Personal dashboard of the calling student.
pub async fn my_stats(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    user.ensure_student("Only students have a dashboard", "/")?;
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    quiz_engine::expire_student_attempts(&mut tx, user.id, now).await?;

    let active = sqlx::query_as::<_, ActiveCourse>(
        r#"
        SELECT c.id AS course_id, c.code, c.name, e.progress
        FROM enrollments e
        JOIN courses c ON c.id = e.course_id
        WHERE e.student_id = $1 AND e.status = 'active'
        ORDER BY c.code
        "#,
    )
    .bind(user.id)
    .fetch_all(&mut *tx)
    .await?;

    let completed_lessons: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM lesson_progress WHERE student_id = $1 AND is_completed",
    )
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let quiz = sqlx::query_as::<_, QuizTotals>(
        r#"
        SELECT COUNT(*) AS taken, COALESCE(AVG(score), 0)::FLOAT8 AS avg_score
        FROM quiz_attempts
        WHERE student_id = $1 AND completed_at IS NOT NULL
        "#,
    )
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let mut overall = attendance::StatusCounts::default();
    let mut total_sessions = 0;
    let mut courses = Vec::with_capacity(active.len());
    for course in &active {
        total_sessions += attendance::session_count(&mut tx, course.course_id).await?;
        let counts = attendance::student_counts(&mut tx, user.id, course.course_id).await?;
        overall.present += counts.present;
        overall.late += counts.late;
        overall.absent += counts.absent;
        overall.excused += counts.excused;

        let grade = grades::recompute(&mut tx, user.id, course.course_id, now).await?;
        courses.push(CourseStat {
            course_id: course.course_id,
            course_code: course.code.clone(),
            course_name: course.name.clone(),
            progress: course.progress,
            total_score: grade.total_score,
            letter_grade: grade.letter_grade,
        });
    }

    let recent_activities = activity::recent(&mut tx, user.id, RECENT_ACTIVITY_LIMIT).await?;
    let weekly_activity = activity::counts_since(&mut tx, user.id, now - Duration::days(7)).await?;
    tx.commit().await?;

    Ok(Json(StudentStats {
        total_courses: active.len() as i64,
        completed_lessons,
        quizzes_taken: quiz.taken,
        avg_quiz_score: quiz.avg_score,
        attendance_percentage: attendance::attendance_percentage(&overall, total_sessions),
        recent_activities,
        weekly_activity,
        courses,
    }))
}
