use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgConnection, PgPool};
use validator::{ValidationError, ValidationErrors};

use crate::{
    error::AppError,
    handlers::teacher::{course_of_material, owned_course},
    models::material::{Material, MaterialRequest, MaterialView},
    utils::{html::clean_html, jwt::CurrentUser},
};

pub const MATERIAL_COLUMNS: &str = "id, course_id, lesson_id, title, description, material_type, \
    file_path, url, file_size, download_count, is_active, created_at, updated_at";

/// A material may only hang off a lesson of its own course.
async fn check_lesson(conn: &mut PgConnection, course_id: i64, lesson_id: Option<i64>) -> Result<(), AppError> {
    let Some(lesson_id) = lesson_id else {
        return Ok(());
    };
    let belongs: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM lessons l JOIN modules m ON m.id = l.module_id \
         WHERE l.id = $1 AND m.course_id = $2)",
    )
    .bind(lesson_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    if belongs {
        Ok(())
    } else {
        let mut errors = ValidationErrors::new();
        errors.add(
            "lesson_id",
            ValidationError::new("foreign_lesson").with_message("Lesson is not part of this course".into()),
        );
        Err(AppError::Validation(errors))
    }
}

/// All materials of the course, hidden ones included.
pub async fn list_materials(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;

    let sql = format!("SELECT {MATERIAL_COLUMNS} FROM materials WHERE course_id = $1 ORDER BY created_at DESC, id DESC");
    let materials = sqlx::query_as::<_, Material>(&sql)
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(Json(materials.into_iter().map(MaterialView::from).collect::<Vec<_>>()))
}

pub async fn create_material(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
    Json(payload): Json<MaterialRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;
    check_lesson(&mut conn, course_id, payload.lesson_id).await?;

    let sql = format!(
        "INSERT INTO materials (course_id, lesson_id, title, description, material_type, \
         file_path, url, file_size, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {MATERIAL_COLUMNS}"
    );
    let material = sqlx::query_as::<_, Material>(&sql)
        .bind(course_id)
        .bind(payload.lesson_id)
        .bind(&payload.title)
        .bind(clean_html(&payload.description))
        .bind(payload.material_type)
        .bind(&payload.file_path)
        .bind(&payload.url)
        .bind(payload.file_size)
        .bind(payload.is_active.unwrap_or(true))
        .fetch_one(&mut *conn)
        .await?;

    tracing::info!("Material {} added to course {}", material.id, course_id);
    Ok((StatusCode::CREATED, Json(MaterialView::from(material))))
}

pub async fn update_material(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<MaterialRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut conn = pool.acquire().await?;
    let course = course_of_material(&mut conn, id, &user).await?;
    check_lesson(&mut conn, course.id, payload.lesson_id).await?;

    let sql = format!(
        "UPDATE materials SET lesson_id = $1, title = $2, description = $3, material_type = $4, \
         file_path = $5, url = $6, file_size = $7, is_active = COALESCE($8, is_active), \
         updated_at = NOW() WHERE id = $9 RETURNING {MATERIAL_COLUMNS}"
    );
    let material = sqlx::query_as::<_, Material>(&sql)
        .bind(payload.lesson_id)
        .bind(&payload.title)
        .bind(clean_html(&payload.description))
        .bind(payload.material_type)
        .bind(&payload.file_path)
        .bind(&payload.url)
        .bind(payload.file_size)
        .bind(payload.is_active)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Json(MaterialView::from(material)))
}

pub async fn delete_material(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_material(&mut conn, id, &user).await?;

    sqlx::query("DELETE FROM materials WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
