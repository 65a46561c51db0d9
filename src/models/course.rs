// src/models/course.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use url::Url;
use utoipa::ToSchema;
use validator::Validate;

/// Represents the 'courses' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Course {
    pub id: i64,
    pub name: String,
    /// Unique short code such as "CS101".
    pub code: String,
    pub description: String,
    pub department_id: Option<i64>,
    /// Set to NULL when the teacher account is deleted.
    pub teacher_id: Option<i64>,
    pub credits: i32,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Course row joined with teacher name and counters, for listings.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct CourseSummary {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: String,
    pub department_id: Option<i64>,
    pub teacher_id: Option<i64>,
    pub teacher_username: Option<String>,
    pub credits: i32,
    pub enrolled_count: i64,
    pub lesson_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'modules' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Module {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: String,
    pub position: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Represents the 'lessons' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Lesson {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    /// Sanitized HTML.
    pub content: String,
    pub video_url: String,
    pub duration_minutes: i32,
    pub position: i32,
    pub is_free: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Lesson header used in course outlines and prev/next navigation.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct LessonOutline {
    pub id: i64,
    pub module_id: i64,
    pub title: String,
    pub duration_minutes: i32,
    pub position: i32,
    pub is_free: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ModuleOutline {
    #[serde(flatten)]
    pub module: Module,
    pub lessons: Vec<LessonOutline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "enrollment_status", rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Dropped,
}

/// Represents the 'enrollments' table: the (student, course) join row.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub status: EnrollmentStatus,
    /// Cached percentage of completed lessons, see `services::progress`.
    pub progress: i32,
    pub enrolled_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'lesson_progress' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct LessonProgress {
    pub id: i64,
    pub student_id: i64,
    pub lesson_id: i64,
    pub is_completed: bool,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Enrollment joined with its course, for "my courses".
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct MyCourse {
    pub enrollment_id: i64,
    pub course_id: i64,
    pub name: String,
    pub code: String,
    pub teacher_username: Option<String>,
    pub status: EnrollmentStatus,
    pub progress: i32,
    pub enrolled_at: chrono::DateTime<chrono::Utc>,
}

/// Query parameters for the public course list.
#[derive(Debug, Deserialize)]
pub struct CourseListParams {
    /// Case-insensitive match on name, code or description.
    pub q: Option<String>,
    pub department: Option<i64>,
}

/// DTO for creating a course. The caller becomes its teacher.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 20))]
    pub code: String,
    #[validate(length(max = 10000))]
    #[serde(default)]
    pub description: String,
    pub department_id: Option<i64>,
    #[validate(range(min = 0, max = 30))]
    pub credits: Option<i32>,
    pub is_active: Option<bool>,
}

/// DTO for updating a course. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCourseRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub code: Option<String>,
    #[validate(length(max = 10000))]
    pub description: Option<String>,
    pub department_id: Option<i64>,
    #[validate(range(min = 0, max = 30))]
    pub credits: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ModuleRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    /// Defaults to the next free slot.
    #[validate(range(min = 0))]
    pub position: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LessonRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 100000))]
    pub content: String,
    #[validate(custom(function = validate_video_url))]
    #[serde(default)]
    pub video_url: String,
    #[validate(range(min = 0, max = 1440))]
    #[serde(default)]
    pub duration_minutes: i32,
    #[validate(range(min = 0))]
    pub position: Option<i32>,
    #[serde(default)]
    pub is_free: bool,
}

/// Empty is allowed; anything else must parse as an absolute URL.
fn validate_video_url(url: &str) -> Result<(), validator::ValidationError> {
    if url.is_empty() {
        return Ok(());
    }
    if Url::parse(url).is_err() {
        return Err(validator::ValidationError::new("invalid_url"));
    }
    Ok(())
}

/// Admin DTO for (re)assigning the teacher of a course.
#[derive(Debug, Deserialize)]
pub struct AssignTeacherRequest {
    pub teacher_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lesson_video_url_must_be_absolute() {
        assert!(validate_video_url("").is_ok());
        assert!(validate_video_url("https://youtu.be/abc").is_ok());
        assert!(validate_video_url("not a url").is_err());
    }

    #[test]
    fn enrollment_status_is_snake_case() {
        let json = serde_json::to_string(&EnrollmentStatus::Dropped).unwrap();
        assert_eq!(json, "\"dropped\"");
    }
}
