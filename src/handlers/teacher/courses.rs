// src/handlers/teacher/courses.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, unique_violation},
    handlers::{
        catalog::{COURSE_COLUMNS, COURSE_SUMMARY_SELECT, course_outline},
        lessons::LESSON_COLUMNS,
        teacher::{course_of_lesson, course_of_module, owned_course},
    },
    models::course::{
        Course, CourseSummary, CreateCourseRequest, Lesson, LessonRequest, Module, ModuleOutline,
        ModuleRequest, UpdateCourseRequest,
    },
    services::progress,
    utils::{html::clean_html, jwt::CurrentUser},
};

const MODULE_COLUMNS: &str = "id, course_id, title, description, position, created_at";

/// Courses taught by the caller, inactive ones included.
pub async fn list_my_courses(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let sql = format!("{COURSE_SUMMARY_SELECT} WHERE c.teacher_id = $1 ORDER BY c.code");
    let courses = sqlx::query_as::<_, CourseSummary>(&sql)
        .bind(user.id)
        .fetch_all(&pool)
        .await?;
    Ok(Json(courses))
}

/// Creates a course taught by the caller.
pub async fn create_course(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let sql = format!(
        "INSERT INTO courses (name, code, description, department_id, teacher_id, credits, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COURSE_COLUMNS}"
    );
    let course = sqlx::query_as::<_, Course>(&sql)
        .bind(&payload.name)
        .bind(&payload.code)
        .bind(clean_html(&payload.description))
        .bind(payload.department_id)
        .bind(user.id)
        .bind(payload.credits.unwrap_or(3))
        .bind(payload.is_active.unwrap_or(true))
        .fetch_one(&pool)
        .await
        .map_err(|e| unique_violation(e, format!("Course code '{}' already exists", payload.code)))?;

    tracing::info!("Teacher {} created course {}", user.id, course.code);
    Ok((StatusCode::CREATED, Json(course)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TeacherCourseDetail {
    pub course: Course,
    pub modules: Vec<ModuleOutline>,
}

pub async fn get_course(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let course = owned_course(&mut conn, id, &user).await?;
    let modules = course_outline(&mut conn, id).await?;
    Ok(Json(TeacherCourseDetail { course, modules }))
}

/// Partial update of a course.
pub async fn update_course(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, id, &user).await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE courses SET updated_at = NOW()");

    if let Some(name) = payload.name {
        builder.push(", name = ");
        builder.push_bind(name);
    }
    if let Some(code) = payload.code {
        builder.push(", code = ");
        builder.push_bind(code);
    }
    if let Some(description) = payload.description {
        builder.push(", description = ");
        builder.push_bind(clean_html(&description));
    }
    if let Some(department_id) = payload.department_id {
        builder.push(", department_id = ");
        builder.push_bind(department_id);
    }
    if let Some(credits) = payload.credits {
        builder.push(", credits = ");
        builder.push_bind(credits);
    }
    if let Some(is_active) = payload.is_active {
        builder.push(", is_active = ");
        builder.push_bind(is_active);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {COURSE_COLUMNS}"));

    let course = builder
        .build_query_as::<Course>()
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| unique_violation(e, "Course code already exists"))?;

    Ok(Json(course))
}

/// Deletes a course with everything it owns.
pub async fn delete_course(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let course = owned_course(&mut conn, id, &user).await?;

    sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    tracing::info!("Teacher {} deleted course {}", user.id, course.code);
    Ok(StatusCode::NO_CONTENT)
}

async fn next_module_position(conn: &mut PgConnection, course_id: i64) -> Result<i32, AppError> {
    Ok(sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM modules WHERE course_id = $1")
        .bind(course_id)
        .fetch_one(&mut *conn)
        .await?)
}

async fn next_lesson_position(conn: &mut PgConnection, module_id: i64) -> Result<i32, AppError> {
    Ok(sqlx::query_scalar("SELECT COALESCE(MAX(position) + 1, 0) FROM lessons WHERE module_id = $1")
        .bind(module_id)
        .fetch_one(&mut *conn)
        .await?)
}

pub async fn create_module(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
    Json(payload): Json<ModuleRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;

    let position = match payload.position {
        Some(p) => p,
        None => next_module_position(&mut conn, course_id).await?,
    };

    let sql = format!(
        "INSERT INTO modules (course_id, title, description, position) \
         VALUES ($1, $2, $3, $4) RETURNING {MODULE_COLUMNS}"
    );
    let module = sqlx::query_as::<_, Module>(&sql)
        .bind(course_id)
        .bind(&payload.title)
        .bind(clean_html(&payload.description))
        .bind(position)
        .fetch_one(&mut *conn)
        .await?;

    Ok((StatusCode::CREATED, Json(module)))
}

pub async fn update_module(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<ModuleRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let mut conn = pool.acquire().await?;
    course_of_module(&mut conn, id, &user).await?;

    let sql = format!(
        "UPDATE modules SET title = $1, description = $2, position = COALESCE($3, position) \
         WHERE id = $4 RETURNING {MODULE_COLUMNS}"
    );
    let module = sqlx::query_as::<_, Module>(&sql)
        .bind(&payload.title)
        .bind(clean_html(&payload.description))
        .bind(payload.position)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Json(module))
}

pub async fn delete_module(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    let course = course_of_module(&mut tx, id, &user).await?;

    sqlx::query("DELETE FROM modules WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    progress::refresh_course(&mut tx, course.id).await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_lesson(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(module_id): Path<i64>,
    Json(payload): Json<LessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let mut tx = pool.begin().await?;
    let course = course_of_module(&mut tx, module_id, &user).await?;

    let position = match payload.position {
        Some(p) => p,
        None => next_lesson_position(&mut tx, module_id).await?,
    };

    let sql = format!(
        "INSERT INTO lessons (module_id, title, content, video_url, duration_minutes, position, is_free) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {LESSON_COLUMNS}"
    );
    let lesson = sqlx::query_as::<_, Lesson>(&sql)
        .bind(module_id)
        .bind(&payload.title)
        .bind(clean_html(&payload.content))
        .bind(&payload.video_url)
        .bind(payload.duration_minutes)
        .bind(position)
        .bind(payload.is_free)
        .fetch_one(&mut *tx)
        .await?;

    progress::refresh_course(&mut tx, course.id).await?;
    tx.commit().await?;

    tracing::info!("Lesson {} added to module {}", lesson.id, module_id);
    Ok((StatusCode::CREATED, Json(lesson)))
}

pub async fn update_lesson(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<LessonRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let mut conn = pool.acquire().await?;
    course_of_lesson(&mut conn, id, &user).await?;

    let sql = format!(
        "UPDATE lessons SET title = $1, content = $2, video_url = $3, duration_minutes = $4, \
         position = COALESCE($5, position), is_free = $6, updated_at = NOW() \
         WHERE id = $7 RETURNING {LESSON_COLUMNS}"
    );
    let lesson = sqlx::query_as::<_, Lesson>(&sql)
        .bind(&payload.title)
        .bind(clean_html(&payload.content))
        .bind(&payload.video_url)
        .bind(payload.duration_minutes)
        .bind(payload.position)
        .bind(payload.is_free)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Json(lesson))
}

/// Cached enrollment progress is refreshed for the whole course.
pub async fn delete_lesson(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    let course = course_of_lesson(&mut tx, id, &user).await?;

    sqlx::query("DELETE FROM lessons WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    progress::refresh_course(&mut tx, course.id).await?;

    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}
