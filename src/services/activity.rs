use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::{
    error::AppError,
    models::activity::{ActivityCount, ActivityLog, ActivityType},
};

/// A log row about to be appended.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user_id: i64,
    pub activity_type: ActivityType,
    pub course_id: Option<i64>,
    pub lesson_id: Option<i64>,
    pub description: String,
    pub ip_address: Option<String>,
}

pub async fn log(conn: &mut PgConnection, entry: NewActivity) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO activity_logs (user_id, activity_type, course_id, lesson_id, description, ip_address)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.activity_type)
    .bind(entry.course_id)
    .bind(entry.lesson_id)
    .bind(&entry.description)
    .bind(&entry.ip_address)
    .execute(&mut *conn)
    .await?;

    tracing::debug!("Activity {:?} logged for user {}", entry.activity_type, entry.user_id);
    Ok(())
}

/// Per-type counts for one user since `since`.
pub async fn counts_since(
    conn: &mut PgConnection,
    user_id: i64,
    since: DateTime<Utc>,
) -> Result<Vec<ActivityCount>, AppError> {
    Ok(sqlx::query_as::<_, ActivityCount>(
        r#"
        SELECT activity_type, COUNT(*) AS count
        FROM activity_logs
        WHERE user_id = $1 AND created_at >= $2
        GROUP BY activity_type
        ORDER BY count DESC
        "#,
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(&mut *conn)
    .await?)
}

/// Newest entries first.
pub async fn recent(
    conn: &mut PgConnection,
    user_id: i64,
    limit: i64,
) -> Result<Vec<ActivityLog>, AppError> {
    Ok(sqlx::query_as::<_, ActivityLog>(
        r#"
        SELECT id, user_id, activity_type, course_id, lesson_id, description, ip_address, created_at
        FROM activity_logs
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?)
}

/// Newest entries touching a course, any user.
pub async fn recent_in_course(
    conn: &mut PgConnection,
    course_id: i64,
    limit: i64,
) -> Result<Vec<ActivityLog>, AppError> {
    Ok(sqlx::query_as::<_, ActivityLog>(
        r#"
        SELECT id, user_id, activity_type, course_id, lesson_id, description, ip_address, created_at
        FROM activity_logs
        WHERE course_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(course_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?)
}

/// Deletes rows older than `before`; returns how many went.
pub async fn purge_before(conn: &mut PgConnection, before: DateTime<Utc>) -> Result<u64, AppError> {
    let result = sqlx::query("DELETE FROM activity_logs WHERE created_at < $1")
        .bind(before)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
