//! Teacher surface. The role gate sits in the router; every handler here
//! additionally checks that the caller teaches the course it touches.

pub mod analytics;
pub mod attendance;
pub mod courses;
pub mod grades;
pub mod materials;
pub mod quizzes;

use sqlx::PgConnection;

use crate::{
    error::AppError,
    handlers::catalog::find_course,
    models::course::Course,
    utils::jwt::CurrentUser,
};

/// Loads a course the caller teaches.
pub async fn owned_course(
    conn: &mut PgConnection,
    course_id: i64,
    user: &CurrentUser,
) -> Result<Course, AppError> {
    let course = find_course(conn, course_id).await?;
    if course.teacher_id != Some(user.id) {
        tracing::warn!("User {} tried to manage course {} they do not teach", user.id, course_id);
        return Err(AppError::forbidden_to("You do not teach this course", "/teacher/courses"));
    }
    Ok(course)
}

/// Resolves the owning course of a child row via `sql` (must select one
/// `course_id` for `$1`) and checks ownership.
async fn owned_via(
    conn: &mut PgConnection,
    sql: &str,
    id: i64,
    what: &str,
    user: &CurrentUser,
) -> Result<Course, AppError> {
    let course_id: i64 = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", what)))?;
    owned_course(conn, course_id, user).await
}

pub async fn course_of_module(conn: &mut PgConnection, id: i64, user: &CurrentUser) -> Result<Course, AppError> {
    owned_via(conn, "SELECT course_id FROM modules WHERE id = $1", id, "Module", user).await
}

pub async fn course_of_lesson(conn: &mut PgConnection, id: i64, user: &CurrentUser) -> Result<Course, AppError> {
    owned_via(
        conn,
        "SELECT m.course_id FROM lessons l JOIN modules m ON m.id = l.module_id WHERE l.id = $1",
        id,
        "Lesson",
        user,
    )
    .await
}

pub async fn course_of_quiz(conn: &mut PgConnection, id: i64, user: &CurrentUser) -> Result<Course, AppError> {
    owned_via(conn, "SELECT course_id FROM quizzes WHERE id = $1", id, "Quiz", user).await
}

pub async fn course_of_question(conn: &mut PgConnection, id: i64, user: &CurrentUser) -> Result<Course, AppError> {
    owned_via(
        conn,
        "SELECT q.course_id FROM questions qu JOIN quizzes q ON q.id = qu.quiz_id WHERE qu.id = $1",
        id,
        "Question",
        user,
    )
    .await
}

pub async fn course_of_session(conn: &mut PgConnection, id: i64, user: &CurrentUser) -> Result<Course, AppError> {
    owned_via(conn, "SELECT course_id FROM class_sessions WHERE id = $1", id, "Session", user).await
}

pub async fn course_of_material(conn: &mut PgConnection, id: i64, user: &CurrentUser) -> Result<Course, AppError> {
    owned_via(conn, "SELECT course_id FROM materials WHERE id = $1", id, "Material", user).await
}
