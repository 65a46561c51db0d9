use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    handlers::catalog::find_enrollment,
    models::{
        activity::ActivityType,
        course::{EnrollmentStatus, Lesson, LessonOutline},
    },
    services::{
        activity::{self, NewActivity},
        progress,
    },
    utils::{
        html::video_embed_url,
        jwt::{CurrentUser, client_ip},
    },
};

pub const LESSON_COLUMNS: &str = "id, module_id, title, content, video_url, duration_minutes, \
    position, is_free, created_at, updated_at";

#[derive(FromRow)]
struct LessonPlacement {
    course_id: i64,
    module_title: String,
}

/// Lesson plus the course it belongs to.
pub async fn find_lesson(conn: &mut PgConnection, id: i64) -> Result<(Lesson, i64, String), AppError> {
    let sql = format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = $1");
    let lesson = sqlx::query_as::<_, Lesson>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Lesson not found".to_string()))?;

    let placement = sqlx::query_as::<_, LessonPlacement>(
        "SELECT course_id, title AS module_title FROM modules WHERE id = $1",
    )
    .bind(lesson.module_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok((lesson, placement.course_id, placement.module_title))
}

async fn has_active_enrollment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<bool, AppError> {
    Ok(matches!(
        find_enrollment(conn, student_id, course_id).await?,
        Some(e) if e.status == EnrollmentStatus::Active
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LessonView {
    pub lesson: Lesson,
    pub course_id: i64,
    pub module_title: String,
    /// Embeddable form of `video_url`, empty when there is no video.
    pub embed_url: String,
    pub is_completed: bool,
    pub previous: Option<LessonOutline>,
    pub next: Option<LessonOutline>,
}

/// Lesson page. Paid lessons need an active enrollment.
pub async fn get_lesson(
    State(pool): State<PgPool>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    let (lesson, course_id, module_title) = find_lesson(&mut tx, id).await?;

    let enrolled = user.is_student() && has_active_enrollment(&mut tx, user.id, course_id).await?;
    if user.is_student() && !lesson.is_free && !enrolled {
        return Err(AppError::forbidden_to(
            "Enroll in the course to open this lesson",
            format!("/courses/{}", course_id),
        ));
    }

    let is_completed = if enrolled {
        let row = progress::touch_lesson(&mut tx, user.id, lesson.id).await?;
        activity::log(
            &mut tx,
            NewActivity {
                user_id: user.id,
                activity_type: ActivityType::ViewLesson,
                course_id: Some(course_id),
                lesson_id: Some(lesson.id),
                description: lesson.title.clone(),
                ip_address: client_ip(&headers),
            },
        )
        .await?;
        row.is_completed
    } else {
        false
    };

    let siblings = sqlx::query_as::<_, LessonOutline>(
        "SELECT id, module_id, title, duration_minutes, position, is_free \
         FROM lessons WHERE module_id = $1 ORDER BY position, id",
    )
    .bind(lesson.module_id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let index = siblings.iter().position(|l| l.id == lesson.id);
    let previous = index
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| siblings.get(i).cloned());
    let next = index.and_then(|i| siblings.get(i + 1).cloned());

    Ok(Json(LessonView {
        embed_url: video_embed_url(&lesson.video_url),
        lesson,
        course_id,
        module_title,
        is_completed,
        previous,
        next,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompletionResponse {
    pub lesson_id: i64,
    pub course_id: i64,
    pub progress: i32,
}

/// Marks a lesson completed and returns the new course progress.
pub async fn complete_lesson(
    State(pool): State<PgPool>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    let (lesson, course_id, _) = find_lesson(&mut tx, id).await?;

    user.ensure_student("Only students track progress", &format!("/lessons/{}", id))?;
    if !has_active_enrollment(&mut tx, user.id, course_id).await? {
        return Err(AppError::forbidden_to(
            "Enroll in the course first",
            format!("/courses/{}", course_id),
        ));
    }

    let progress = progress::complete_lesson(&mut tx, user.id, lesson.id, course_id, Utc::now()).await?;

    activity::log(
        &mut tx,
        NewActivity {
            user_id: user.id,
            activity_type: ActivityType::CompleteLesson,
            course_id: Some(course_id),
            lesson_id: Some(lesson.id),
            description: lesson.title.clone(),
            ip_address: client_ip(&headers),
        },
    )
    .await?;

    tx.commit().await?;

    Ok(Json(CompletionResponse {
        lesson_id: lesson.id,
        course_id,
        progress,
    }))
}
