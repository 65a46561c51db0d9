// src/handlers/quiz.rs

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppError,
    handlers::catalog::find_enrollment,
    models::{
        course::EnrollmentStatus,
        quiz::{QuizAttempt, QuizDetail, QuizListItem, SubmitAnswersRequest},
    },
    services::quiz_engine::{self, ATTEMPT_COLUMNS},
    utils::jwt::{CurrentUser, client_ip},
};

#[derive(FromRow)]
struct QuizRow {
    #[sqlx(flatten)]
    quiz: crate::models::quiz::Quiz,
    course_code: String,
}

#[derive(FromRow)]
struct AttemptSummary {
    attempts_count: i64,
    best_score: Option<i32>,
    is_passed: Option<bool>,
}

fn attempts_left(allowed: i32, used: i64) -> i64 {
    (i64::from(allowed) - used).max(0)
}

/// Active quizzes of the courses the caller is enrolled in. Expired attempts
/// are closed first so the counts include them.
pub async fn list_quizzes(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    quiz_engine::expire_student_attempts(&mut tx, user.id, now).await?;

    let rows = sqlx::query_as::<_, QuizRow>(
        r#"
        SELECT q.id, q.course_id, q.title, q.description, q.time_limit_minutes,
               q.passing_score, q.attempts_allowed, q.shuffle_questions,
               q.show_correct_answers, q.available_from, q.available_until,
               q.is_active, q.created_at, q.updated_at, c.code AS course_code
        FROM quizzes q
        JOIN courses c ON c.id = q.course_id
        JOIN enrollments e ON e.course_id = q.course_id
        WHERE e.student_id = $1 AND e.status = 'active' AND q.is_active
        ORDER BY q.available_until, q.id
        "#,
    )
    .bind(user.id)
    .fetch_all(&mut *tx)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let summary = sqlx::query_as::<_, AttemptSummary>(
            r#"
            SELECT COUNT(*) FILTER (WHERE completed_at IS NOT NULL) AS attempts_count,
                   MAX(score) AS best_score,
                   BOOL_OR(is_passed) AS is_passed
            FROM quiz_attempts
            WHERE quiz_id = $1 AND student_id = $2
            "#,
        )
        .bind(row.quiz.id)
        .bind(user.id)
        .fetch_one(&mut *tx)
        .await?;

        items.push(QuizListItem {
            status: row.quiz.status(now),
            attempts_left: attempts_left(row.quiz.attempts_allowed, summary.attempts_count),
            attempts_count: summary.attempts_count,
            best_score: summary.best_score,
            is_passed: summary.is_passed,
            course_code: row.course_code,
            quiz: row.quiz,
        });
    }

    tx.commit().await?;
    Ok(Json(items))
}

#[derive(FromRow)]
struct QuestionTotals {
    question_count: i64,
    total_points: i64,
}

/// Quiz page with the caller's attempts. Expired attempts are closed first.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let quiz = quiz_engine::find_quiz(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

    let enrolled = matches!(
        find_enrollment(&mut tx, user.id, quiz.course_id).await?,
        Some(e) if e.status == EnrollmentStatus::Active
    );
    if !enrolled {
        return Err(AppError::forbidden_to(
            "Enroll in the course to see its quizzes",
            format!("/courses/{}", quiz.course_id),
        ));
    }

    let ongoing_attempt = quiz_engine::expire_stale_attempt(&mut tx, &quiz, user.id, now).await?;

    let sql = format!(
        "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts \
         WHERE quiz_id = $1 AND student_id = $2 ORDER BY started_at DESC"
    );
    let attempts = sqlx::query_as::<_, QuizAttempt>(&sql)
        .bind(quiz.id)
        .bind(user.id)
        .fetch_all(&mut *tx)
        .await?;

    let totals = sqlx::query_as::<_, QuestionTotals>(
        "SELECT COUNT(*) AS question_count, COALESCE(SUM(points), 0)::BIGINT AS total_points \
         FROM questions WHERE quiz_id = $1",
    )
    .bind(quiz.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let used = attempts.iter().filter(|a| a.is_completed()).count() as i64;
    Ok(Json(QuizDetail {
        status: quiz.status(now),
        question_count: totals.question_count,
        total_points: totals.total_points,
        attempts_left: attempts_left(quiz.attempts_allowed, used),
        attempts,
        ongoing_attempt,
        quiz,
    }))
}

/// Starts a new attempt or resumes the open one.
pub async fn start_quiz(
    State(pool): State<PgPool>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let response = quiz_engine::start_attempt(&pool, user, id, client_ip(&headers), Utc::now()).await?;
    let status = if response.created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(response)))
}

pub async fn get_attempt(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(quiz_engine::open_attempt(&pool, user, id, Utc::now()).await?))
}

/// Saves a draft of the answers.
pub async fn save_answers(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(quiz_engine::save_answers(&pool, user, id, &payload, Utc::now()).await?))
}

pub async fn submit_attempt(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(quiz_engine::submit_attempt(&pool, user, id, &payload, Utc::now()).await?))
}

pub async fn attempt_result(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(quiz_engine::attempt_result(&pool, user, id, Utc::now()).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_left_never_goes_negative() {
        assert_eq!(attempts_left(3, 1), 2);
        assert_eq!(attempts_left(2, 2), 0);
        assert_eq!(attempts_left(1, 4), 0);
    }
}
