use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "activity_type", rename_all = "snake_case")]
pub enum ActivityType {
    Login,
    Logout,
    ViewCourse,
    EnrollCourse,
    ViewLesson,
    CompleteLesson,
    StartQuiz,
    CompleteQuiz,
}

/// Represents the 'activity_logs' table. Rows are never updated.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: i64,
    pub activity_type: ActivityType,
    pub course_id: Option<i64>,
    pub lesson_id: Option<i64>,
    pub description: String,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Count of one activity type inside a time window.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct ActivityCount {
    pub activity_type: ActivityType,
    pub count: i64,
}

/// Admin query for purging old log rows.
#[derive(Debug, Deserialize)]
pub struct PurgeActivityParams {
    /// Delete rows created strictly before this instant.
    pub before: DateTime<Utc>,
}
