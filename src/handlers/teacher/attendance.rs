use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    handlers::teacher::{course_of_session, owned_course},
    models::attendance::{
        AttendanceSheetRow, Session, SessionRequest, SessionType, TakeAttendanceRequest,
    },
    services::attendance::{self, SESSION_COLUMNS},
    utils::jwt::CurrentUser,
};

async fn find_session(conn: &mut PgConnection, id: i64) -> Result<Session, AppError> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM class_sessions WHERE id = $1");
    sqlx::query_as::<_, Session>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
}

pub async fn list_sessions(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;
    Ok(Json(attendance::course_sessions(&mut conn, course_id).await?))
}

pub async fn create_session(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
    Json(payload): Json<SessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;

    let sql = format!(
        "INSERT INTO class_sessions (course_id, title, session_type, date, start_time, end_time) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SESSION_COLUMNS}"
    );
    let session = sqlx::query_as::<_, Session>(&sql)
        .bind(course_id)
        .bind(&payload.title)
        .bind(payload.session_type.unwrap_or(SessionType::Lecture))
        .bind(payload.date)
        .bind(payload.start_time)
        .bind(payload.end_time)
        .fetch_one(&mut *conn)
        .await?;

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn update_session(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<SessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.check()?;
    let mut conn = pool.acquire().await?;
    course_of_session(&mut conn, id, &user).await?;

    let sql = format!(
        "UPDATE class_sessions SET title = $1, session_type = COALESCE($2, session_type), \
         date = $3, start_time = $4, end_time = $5 WHERE id = $6 RETURNING {SESSION_COLUMNS}"
    );
    let session = sqlx::query_as::<_, Session>(&sql)
        .bind(&payload.title)
        .bind(payload.session_type)
        .bind(payload.date)
        .bind(payload.start_time)
        .bind(payload.end_time)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(Json(session))
}

pub async fn delete_session(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_session(&mut conn, id, &user).await?;

    sqlx::query("DELETE FROM class_sessions WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceSheet {
    pub session: Session,
    pub rows: Vec<AttendanceSheetRow>,
}

/// Enrolled students with their current mark for the session.
pub async fn attendance_sheet(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    course_of_session(&mut conn, id, &user).await?;
    let session = find_session(&mut conn, id).await?;

    let students = attendance::enrolled_students(&mut conn, session.course_id).await?;
    let marks = attendance::session_marks(&mut conn, id).await?;

    let rows = students
        .into_iter()
        .map(|student| {
            let attendance = marks.iter().find(|m| m.student_id == student.id).cloned();
            AttendanceSheetRow { student, attendance }
        })
        .collect();

    Ok(Json(AttendanceSheet { session, rows }))
}

/// Records marks for every enrolled student; unlisted students are absent.
pub async fn take_attendance(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(payload): Json<TakeAttendanceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    course_of_session(&mut tx, id, &user).await?;
    let session = find_session(&mut tx, id).await?;

    let marked = attendance::take_attendance(&mut tx, &session, &payload.marks, Utc::now()).await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({ "session_id": id, "marked": marked })))
}

/// Student-by-session matrix with percentages.
pub async fn course_report(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;
    Ok(Json(attendance::course_report(&mut conn, course_id).await?))
}
