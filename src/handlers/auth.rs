// src/handlers/auth.rs

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, QueryBuilder, Postgres};
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, unique_violation},
    models::{
        activity::ActivityType,
        user::{CreateUserRequest, LoginRequest, Role, UpdateProfileRequest, User, UserResponse},
    },
    services::activity::{self, NewActivity},
    utils::{
        hash::{hash_password, verify_password},
        jwt::{CurrentUser, client_ip, sign_jwt},
    },
};

pub const USER_COLUMNS: &str =
    "id, username, password, role, first_name, last_name, email, phone, created_at";

/// Registers a new student or teacher.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created and the user object (excluding password).
pub async fn register(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let role = payload.role.unwrap_or(Role::Student);
    if !role.is_self_registrable() {
        return Err(AppError::BadRequest(format!(
            "Role '{}' cannot be chosen at registration",
            role.as_str()
        )));
    }

    let hashed_password = hash_password(&payload.password)?;

    let sql = format!(
        "INSERT INTO users (username, password, role, first_name, last_name, email) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {USER_COLUMNS}"
    );
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(&payload.username)
        .bind(&hashed_password)
        .bind(role)
        .bind(&payload.first_name)
        .bind(&payload.last_name)
        .bind(payload.email.as_deref().unwrap_or(""))
        .fetch_one(&pool)
        .await
        .map_err(|e| unique_violation(e, format!("Username '{}' already exists", payload.username)))?;

    tracing::info!("Registered {} '{}'", user.role.as_str(), user.username);
    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Authenticates a user and returns a JWT token.
///
/// Unknown username and wrong password give the same answer.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
    let user = sqlx::query_as::<_, User>(&sql)
        .bind(&payload.username)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::AuthError("Invalid username or password".to_string()))?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::AuthError("Invalid username or password".to_string()));
    }

    let token = sign_jwt(user.id, user.role, &config.jwt_secret, config.jwt_expiration)?;

    let mut conn = pool.acquire().await?;
    activity::log(
        &mut conn,
        NewActivity {
            user_id: user.id,
            activity_type: ActivityType::Login,
            course_id: None,
            lesson_id: None,
            description: String::new(),
            ip_address: client_ip(&headers),
        },
    )
    .await?;

    tracing::info!("User '{}' logged in", user.username);

    Ok(Json(json!({
        "token": token,
        "type": "Bearer",
        "user": UserResponse::from(user),
    })))
}

/// Records the logout. Tokens are stateless; the client drops it.
pub async fn logout(
    State(pool): State<PgPool>,
    user: CurrentUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    activity::log(
        &mut conn,
        NewActivity {
            user_id: user.id,
            activity_type: ActivityType::Logout,
            course_id: None,
            lesson_id: None,
            description: String::new(),
            ip_address: client_ip(&headers),
        },
    )
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn fetch_user(pool: &PgPool, id: i64) -> Result<User, AppError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    sqlx::query_as::<_, User>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Returns the caller's profile.
pub async fn me(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let profile = fetch_user(&pool, user.id).await?;
    Ok(Json(UserResponse::from(profile)))
}

/// Updates name, email and phone of the caller.
pub async fn update_me(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE users SET ");
    let mut separated = builder.separated(", ");
    let mut changed = false;

    if let Some(first_name) = payload.first_name {
        separated.push("first_name = ");
        separated.push_bind_unseparated(first_name);
        changed = true;
    }
    if let Some(last_name) = payload.last_name {
        separated.push("last_name = ");
        separated.push_bind_unseparated(last_name);
        changed = true;
    }
    if let Some(email) = payload.email {
        separated.push("email = ");
        separated.push_bind_unseparated(email);
        changed = true;
    }
    if let Some(phone) = payload.phone {
        separated.push("phone = ");
        separated.push_bind_unseparated(phone);
        changed = true;
    }

    if changed {
        builder.push(" WHERE id = ");
        builder.push_bind(user.id);
        builder.build().execute(&pool).await?;
        tracing::info!("User {} updated their profile", user.id);
    }

    let profile = fetch_user(&pool, user.id).await?;
    Ok(Json(UserResponse::from(profile)))
}
