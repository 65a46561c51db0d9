// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, unique_violation},
    handlers::catalog::{COURSE_COLUMNS, find_course},
    models::{
        activity::PurgeActivityParams,
        course::{AssignTeacherRequest, Course},
        organization::{CreateDepartmentRequest, CreateFacultyRequest, Department, Faculty},
        user::{Role, UserResponse},
    },
    services::activity,
    utils::{hash::hash_password, jwt::CurrentUser},
};

const USER_RESPONSE_COLUMNS: &str =
    "id, username, role, first_name, last_name, email, phone, created_at";

/// Lists all users in the system.
pub async fn list_users(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let sql = format!("SELECT {USER_RESPONSE_COLUMNS} FROM users ORDER BY id DESC");
    let users = sqlx::query_as::<_, UserResponse>(&sql).fetch_all(&pool).await?;
    Ok(Json(users))
}

/// DTO for Admin creating a user (any role).
#[derive(Debug, Deserialize, Validate)]
pub struct AdminCreateUserRequest {
    #[validate(length(min = 3, max = 50, message = "Username length must be between 3 and 50 characters."))]
    pub username: String,
    #[validate(length(min = 4, max = 128, message = "Password length must be between 4 and 128 characters."))]
    pub password: String,
    pub role: Role,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub first_name: String,
    #[validate(length(max = 100))]
    #[serde(default)]
    pub last_name: String,
    #[validate(email)]
    pub email: Option<String>,
}

/// Creates a new user with specific role.
pub async fn create_user(
    State(pool): State<PgPool>,
    Json(payload): Json<AdminCreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let hashed_password = hash_password(&payload.password)?;

    let sql = format!(
        "INSERT INTO users (username, password, role, first_name, last_name, email) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_RESPONSE_COLUMNS}"
    );
    let user = sqlx::query_as::<_, UserResponse>(&sql)
        .bind(&payload.username)
        .bind(hashed_password)
        .bind(payload.role)
        .bind(&payload.first_name)
        .bind(&payload.last_name)
        .bind(payload.email.as_deref().unwrap_or(""))
        .fetch_one(&pool)
        .await
        .map_err(|e| unique_violation(e, format!("Username '{}' already exists", payload.username)))?;

    tracing::info!("Admin created {} '{}'", user.role.as_str(), user.username);
    Ok((StatusCode::CREATED, Json(user)))
}

/// DTO for updating a user. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminUpdateUserRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: Option<String>,
    pub role: Option<Role>,
    #[validate(length(min = 4, max = 128))]
    pub password: Option<String>,
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
}

/// Updates user information.
pub async fn update_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
    let mut fields = builder.separated(", ");
    fields.push("id = id");

    if let Some(username) = &payload.username {
        fields.push("username = ").push_bind_unseparated(username.clone());
    }
    if let Some(role) = payload.role {
        fields.push("role = ").push_bind_unseparated(role);
    }
    if let Some(password) = &payload.password {
        fields.push("password = ").push_bind_unseparated(hash_password(password)?);
    }
    if let Some(first_name) = &payload.first_name {
        fields.push("first_name = ").push_bind_unseparated(first_name.clone());
    }
    if let Some(last_name) = &payload.last_name {
        fields.push("last_name = ").push_bind_unseparated(last_name.clone());
    }
    if let Some(email) = &payload.email {
        fields.push("email = ").push_bind_unseparated(email.clone());
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);
    builder.push(format!(" RETURNING {USER_RESPONSE_COLUMNS}"));

    let user = builder
        .build_query_as::<UserResponse>()
        .fetch_optional(&pool)
        .await
        .map_err(|e| unique_violation(e, "Username already exists"))?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(user))
}

/// Deletes a user by ID. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == user.id {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!("Admin {} deleted user {}", user.id, id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_faculties(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let faculties = sqlx::query_as::<_, Faculty>("SELECT id, name, code FROM faculties ORDER BY name")
        .fetch_all(&pool)
        .await?;
    Ok(Json(faculties))
}

pub async fn create_faculty(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateFacultyRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let faculty = sqlx::query_as::<_, Faculty>(
        "INSERT INTO faculties (name, code) VALUES ($1, $2) RETURNING id, name, code",
    )
    .bind(&payload.name)
    .bind(&payload.code)
    .fetch_one(&pool)
    .await
    .map_err(|e| unique_violation(e, format!("Faculty code '{}' already exists", payload.code)))?;

    Ok((StatusCode::CREATED, Json(faculty)))
}

pub async fn list_departments(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let departments = sqlx::query_as::<_, Department>(
        "SELECT id, name, faculty_id FROM departments ORDER BY faculty_id, name",
    )
    .fetch_all(&pool)
    .await?;
    Ok(Json(departments))
}

pub async fn create_department(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateDepartmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let faculty_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM faculties WHERE id = $1)")
        .bind(payload.faculty_id)
        .fetch_one(&pool)
        .await?;
    if !faculty_exists {
        return Err(AppError::NotFound("Faculty not found".to_string()));
    }

    let department = sqlx::query_as::<_, Department>(
        "INSERT INTO departments (name, faculty_id) VALUES ($1, $2) RETURNING id, name, faculty_id",
    )
    .bind(&payload.name)
    .bind(payload.faculty_id)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(department)))
}

/// Sets or clears the teacher of a course. The new teacher must hold the
/// teacher role.
pub async fn assign_teacher(
    State(pool): State<PgPool>,
    Path(course_id): Path<i64>,
    Json(payload): Json<AssignTeacherRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    find_course(&mut conn, course_id).await?;

    if let Some(teacher_id) = payload.teacher_id {
        let role: Role = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
            .bind(teacher_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        match role {
            Role::Teacher => {}
            Role::Student | Role::Admin => {
                return Err(AppError::BadRequest("Only teachers can be assigned to a course".to_string()));
            }
        }
    }

    let sql = format!(
        "UPDATE courses SET teacher_id = $1, updated_at = NOW() WHERE id = $2 RETURNING {COURSE_COLUMNS}"
    );
    let course = sqlx::query_as::<_, Course>(&sql)
        .bind(payload.teacher_id)
        .bind(course_id)
        .fetch_one(&mut *conn)
        .await?;

    tracing::info!("Course {} assigned to teacher {:?}", course.code, course.teacher_id);
    Ok(Json(course))
}

/// Deletes activity rows older than `before`.
pub async fn purge_activity(
    State(pool): State<PgPool>,
    Query(params): Query<PurgeActivityParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let deleted = activity::purge_before(&mut conn, params.before).await?;
    tracing::info!("Purged {} activity rows before {}", deleted, params.before);
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}
