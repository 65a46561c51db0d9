// src/handlers/materials.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::{PgConnection, PgPool};

use crate::{
    error::AppError,
    handlers::{
        catalog::{find_course, find_enrollment},
        teacher::materials::MATERIAL_COLUMNS,
    },
    models::{
        course::EnrollmentStatus,
        material::{DownloadTarget, Material, MaterialView},
        user::Role,
    },
    utils::jwt::CurrentUser,
};

/// Students need a live enrollment; teachers must teach the course.
async fn ensure_course_access(conn: &mut PgConnection, course_id: i64, user: &CurrentUser) -> Result<(), AppError> {
    let course = find_course(conn, course_id).await?;
    let allowed = match user.role {
        Role::Admin => true,
        Role::Teacher => course.teacher_id == Some(user.id),
        Role::Student => matches!(
            find_enrollment(conn, user.id, course_id).await?,
            Some(e) if e.status != EnrollmentStatus::Dropped
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(AppError::forbidden_to(
            "Enroll in the course to see its materials",
            format!("/courses/{}", course_id),
        ))
    }
}

/// Published materials of a course, newest first.
pub async fn course_materials(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    ensure_course_access(&mut conn, course_id, &user).await?;

    let sql = format!(
        "SELECT {MATERIAL_COLUMNS} FROM materials WHERE course_id = $1 AND is_active \
         ORDER BY created_at DESC, id DESC"
    );
    let materials = sqlx::query_as::<_, Material>(&sql)
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(Json(materials.into_iter().map(MaterialView::from).collect::<Vec<_>>()))
}

/// Link materials resolve to their URL, files to the media mount.
fn download_location(material: &Material) -> Option<String> {
    match (&material.url, &material.file_path) {
        (Some(url), _) => Some(url.clone()),
        (None, Some(path)) => Some(format!("/media/{}", path.trim_start_matches('/'))),
        (None, None) => None,
    }
}

/// Counts the download and tells the client where to fetch the content.
pub async fn download_material(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;

    let sql = format!("SELECT {MATERIAL_COLUMNS} FROM materials WHERE id = $1 AND is_active");
    let material = sqlx::query_as::<_, Material>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Material not found".to_string()))?;

    ensure_course_access(&mut conn, material.course_id, &user).await?;

    let location = download_location(&material)
        .ok_or_else(|| AppError::NotFound("Material has no content".to_string()))?;

    sqlx::query("UPDATE materials SET download_count = download_count + 1 WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    tracing::info!("User {} downloaded material {}", user.id, id);
    Ok(Json(DownloadTarget {
        material_id: id,
        location,
    }))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::material::MaterialType;

    fn material(file_path: Option<&str>, url: Option<&str>) -> Material {
        Material {
            id: 1,
            course_id: 1,
            lesson_id: None,
            title: "Week 1".to_string(),
            description: String::new(),
            material_type: MaterialType::Pdf,
            file_path: file_path.map(str::to_string),
            url: url.map(str::to_string),
            file_size: 2048,
            download_count: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn files_resolve_under_media() {
        let m = material(Some("materials/week1.pdf"), None);
        assert_eq!(download_location(&m).as_deref(), Some("/media/materials/week1.pdf"));
    }

    #[test]
    fn links_resolve_to_their_url() {
        let m = material(None, Some("https://example.org/paper"));
        assert_eq!(download_location(&m).as_deref(), Some("https://example.org/paper"));
        assert_eq!(download_location(&material(None, None)), None);
    }
}
