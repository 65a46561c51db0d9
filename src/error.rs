// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Neutral landing surface that rejected callers are pointed back to.
pub const LANDING_REDIRECT: &str = "/";

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 400 Bad Request with field-level messages
    Validation(validator::ValidationErrors),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden: wrong role or missing enrollment
    Forbidden { message: String, redirect: String },

    // 404 Not Found (also used for rows the caller does not own)
    NotFound(String),

    // 409 Conflict (e.g., duplicate username)
    Conflict(String),

    // 409 Conflict: attempts exhausted, quiz closed, ...
    BusinessRule { message: String, redirect: String },
}

impl AppError {
    /// Authorization failure that sends the caller back to the landing page.
    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: message.into(),
            redirect: LANDING_REDIRECT.to_string(),
        }
    }

    /// Authorization failure with an explicit redirect target.
    pub fn forbidden_to(message: impl Into<String>, redirect: impl Into<String>) -> Self {
        AppError::Forbidden {
            message: message.into(),
            redirect: redirect.into(),
        }
    }

    pub fn rule(message: impl Into<String>, redirect: impl Into<String>) -> Self {
        AppError::BusinessRule {
            message: message.into(),
            redirect: redirect.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Validation(errors) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Validation failed", "fields": errors }),
            ),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            AppError::Forbidden { message, redirect } => (
                StatusCode::FORBIDDEN,
                json!({ "error": message, "redirect": redirect }),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::BusinessRule { message, redirect } => (
                StatusCode::CONFLICT,
                json!({ "warning": message, "redirect": redirect }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors)
    }
}

/// Maps a unique-violation into a `Conflict` with the given message,
/// anything else into an internal error.
pub fn unique_violation(err: sqlx::Error, message: impl Into<String>) -> AppError {
    let is_unique = err
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);

    if is_unique {
        AppError::Conflict(message.into())
    } else {
        tracing::error!("Database error: {:?}", err);
        AppError::from(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_points_at_landing() {
        let response = AppError::forbidden("Teachers only").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn business_rule_is_conflict() {
        let response = AppError::rule("No attempts left", "/quizzes/1").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn database_errors_are_internal() {
        let response = AppError::from(sqlx::Error::RowNotFound).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
