// src/handlers/teacher/quizzes.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    handlers::teacher::{course_of_question, course_of_quiz, owned_course},
    models::quiz::{Answer, AttemptRow, Question, QuestionRequest, QuestionWithAnswers, Quiz, QuizRequest, QuizStats},
    services::quiz_engine::{self, QUIZ_COLUMNS},
    utils::{html::clean_html, jwt::CurrentUser},
};

const QUESTION_COLUMNS: &str = "id, quiz_id, question_type, text, points, position";

pub async fn list_course_quizzes(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;

    let sql = format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE course_id = $1 ORDER BY available_from, id");
    let quizzes = sqlx::query_as::<_, Quiz>(&sql)
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(Json(quizzes))
}

pub async fn create_quiz(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
    Json(payload): Json<QuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;

    let sql = format!(
        "INSERT INTO quizzes (course_id, title, description, time_limit_minutes, passing_score, \
         attempts_allowed, shuffle_questions, show_correct_answers, available_from, \
         available_until, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {QUIZ_COLUMNS}"
    );
    let quiz = sqlx::query_as::<_, Quiz>(&sql)
        .bind(course_id)
        .bind(&payload.title)
        .bind(clean_html(&payload.description))
        .bind(payload.time_limit_minutes)
        .bind(payload.passing_score)
        .bind(payload.attempts_allowed)
        .bind(payload.shuffle_questions)
        .bind(payload.show_correct_answers)
        .bind(payload.available_from)
        .bind(payload.available_until)
        .bind(payload.is_active)
        .fetch_one(&mut *conn)
        .await?;

    tracing::info!("Quiz {} created in course {}", quiz.id, course_id);
    Ok((StatusCode::CREATED, Json(quiz)))
}

async fn quiz_stats(conn: &mut PgConnection, quiz_id: i64) -> Result<QuizStats, AppError> {
    Ok(sqlx::query_as::<_, QuizStats>(
        r#"
        SELECT COUNT(*) AS total_attempts,
               COALESCE(AVG(score), 0)::FLOAT8 AS avg_score,
               COUNT(*) FILTER (WHERE is_passed) AS passed_count
        FROM quiz_attempts
        WHERE quiz_id = $1 AND completed_at IS NOT NULL
        "#,
    )
    .bind(quiz_id)
    .fetch_one(&mut *conn)
    .await?)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TeacherQuizDetail {
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithAnswers>,
    pub stats: QuizStats,
}

/// Quiz with the full answer key and attempt statistics.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_quiz(&mut conn, id, &user).await?;

    let quiz = quiz_engine::find_quiz(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;
    let questions = quiz_engine::load_questions(&mut conn, id, false).await?;
    let stats = quiz_stats(&mut conn, id).await?;

    Ok(Json(TeacherQuizDetail { quiz, questions, stats }))
}

/// Replaces the quiz settings.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<QuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut conn = pool.acquire().await?;
    course_of_quiz(&mut conn, id, &user).await?;

    let sql = format!(
        "UPDATE quizzes SET title = $1, description = $2, time_limit_minutes = $3, \
         passing_score = $4, attempts_allowed = $5, shuffle_questions = $6, \
         show_correct_answers = $7, available_from = $8, available_until = $9, \
         is_active = $10, updated_at = NOW() \
         WHERE id = $11 RETURNING {QUIZ_COLUMNS}"
    );
    let quiz = sqlx::query_as::<_, Quiz>(&sql)
        .bind(&payload.title)
        .bind(clean_html(&payload.description))
        .bind(payload.time_limit_minutes)
        .bind(payload.passing_score)
        .bind(payload.attempts_allowed)
        .bind(payload.shuffle_questions)
        .bind(payload.show_correct_answers)
        .bind(payload.available_from)
        .bind(payload.available_until)
        .bind(payload.is_active)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Json(quiz))
}

pub async fn delete_quiz(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_quiz(&mut conn, id, &user).await?;

    sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    tracing::info!("Quiz {} deleted by teacher {}", id, user.id);
    Ok(StatusCode::NO_CONTENT)
}

async fn insert_options(
    conn: &mut PgConnection,
    question_id: i64,
    payload: &QuestionRequest,
) -> Result<(), AppError> {
    for (position, option) in payload.answers.iter().enumerate() {
        sqlx::query("INSERT INTO answers (question_id, text, is_correct, position) VALUES ($1, $2, $3, $4)")
            .bind(question_id)
            .bind(&option.text)
            .bind(option.is_correct)
            .bind(position as i32)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn question_with_answers(conn: &mut PgConnection, question: Question) -> Result<QuestionWithAnswers, AppError> {
    let answers = sqlx::query_as::<_, Answer>(
        "SELECT id, question_id, text, is_correct, position FROM answers \
         WHERE question_id = $1 ORDER BY position, id",
    )
    .bind(question.id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(QuestionWithAnswers { question, answers })
}

/// Adds a question together with its answer options.
pub async fn create_question(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<QuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut tx = pool.begin().await?;
    course_of_quiz(&mut tx, quiz_id, &user).await?;

    let position = match payload.position {
        Some(p) => p,
        None => sqlx::query_scalar::<_, i32>("SELECT COALESCE(MAX(position) + 1, 0) FROM questions WHERE quiz_id = $1")
            .bind(quiz_id)
            .fetch_one(&mut *tx)
            .await?,
    };

    let sql = format!(
        "INSERT INTO questions (quiz_id, question_type, text, points, position) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {QUESTION_COLUMNS}"
    );
    let question = sqlx::query_as::<_, Question>(&sql)
        .bind(quiz_id)
        .bind(payload.question_type)
        .bind(&payload.text)
        .bind(payload.points)
        .bind(position)
        .fetch_one(&mut *tx)
        .await?;

    insert_options(&mut tx, question.id, &payload).await?;
    let created = question_with_answers(&mut tx, question).await?;
    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Replaces a question and its options. Selections stored against the old
/// options go with them.
pub async fn update_question(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<QuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut tx = pool.begin().await?;
    course_of_question(&mut tx, id, &user).await?;

    let sql = format!(
        "UPDATE questions SET question_type = $1, text = $2, points = $3, \
         position = COALESCE($4, position) WHERE id = $5 RETURNING {QUESTION_COLUMNS}"
    );
    let question = sqlx::query_as::<_, Question>(&sql)
        .bind(payload.question_type)
        .bind(&payload.text)
        .bind(payload.points)
        .bind(payload.position)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM answers WHERE question_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    insert_options(&mut tx, id, &payload).await?;

    let updated = question_with_answers(&mut tx, question).await?;
    tx.commit().await?;

    Ok(Json(updated))
}

pub async fn delete_question(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_question(&mut conn, id, &user).await?;

    sqlx::query("DELETE FROM questions WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_quiz_stats(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_quiz(&mut conn, id, &user).await?;
    Ok(Json(quiz_stats(&mut conn, id).await?))
}

/// Completed attempts of all students, best first.
pub async fn get_quiz_results(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_quiz(&mut conn, id, &user).await?;

    let rows = sqlx::query_as::<_, AttemptRow>(
        r#"
        SELECT a.id, a.student_id, u.username, a.started_at, a.completed_at,
               a.score, a.points_earned, a.points_possible, a.is_passed
        FROM quiz_attempts a
        JOIN users u ON u.id = a.student_id
        WHERE a.quiz_id = $1 AND a.completed_at IS NOT NULL
        ORDER BY a.score DESC NULLS LAST, a.completed_at
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Json(rows))
}
