use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::LANDING_COURSE_COUNT,
    error::AppError,
    handlers::catalog::COURSE_SUMMARY_SELECT,
    models::course::CourseSummary,
    services::assistant::Assistant,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct LandingStats {
    pub active_courses: i64,
    pub students: i64,
    pub teachers: i64,
    pub faculties: i64,
    pub newest_courses: Vec<CourseSummary>,
}

/// Public landing page numbers.
pub async fn landing(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let active_courses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM courses WHERE is_active")
        .fetch_one(&pool)
        .await?;
    let students: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'student'")
        .fetch_one(&pool)
        .await?;
    let teachers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'teacher'")
        .fetch_one(&pool)
        .await?;
    let faculties: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM faculties")
        .fetch_one(&pool)
        .await?;

    let sql = format!("{COURSE_SUMMARY_SELECT} WHERE c.is_active ORDER BY c.created_at DESC, c.id DESC LIMIT $1");
    let newest_courses = sqlx::query_as::<_, CourseSummary>(&sql)
        .bind(LANDING_COURSE_COUNT)
        .fetch_all(&pool)
        .await?;

    Ok(Json(LandingStats {
        active_courses,
        students,
        teachers,
        faculties,
        newest_courses,
    }))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 2000, message = "Message must be 1 to 2000 characters."))]
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub reply: String,
}

/// Help-desk chat. Never fails once the message is valid.
pub async fn assistant_chat(
    State(assistant): State<Arc<dyn Assistant>>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let reply = assistant.reply(payload.message.trim()).await;
    Ok(Json(ChatResponse { reply }))
}
