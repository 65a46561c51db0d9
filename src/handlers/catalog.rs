// src/handlers/catalog.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    models::{
        activity::ActivityType,
        course::{
            Course, CourseListParams, CourseSummary, Enrollment, EnrollmentStatus, LessonOutline,
            Module, ModuleOutline, MyCourse,
        },
    },
    services::activity::{self, NewActivity},
    utils::jwt::{CurrentUser, MaybeUser, client_ip},
};

/// Course row with teacher name and counters; callers append WHERE/ORDER.
pub const COURSE_SUMMARY_SELECT: &str = r#"
    SELECT c.id, c.name, c.code, c.description, c.department_id, c.teacher_id,
           u.username AS teacher_username, c.credits,
           (SELECT COUNT(*) FROM enrollments e
             WHERE e.course_id = c.id AND e.status = 'active') AS enrolled_count,
           (SELECT COUNT(*) FROM lessons l JOIN modules m ON m.id = l.module_id
             WHERE m.course_id = c.id) AS lesson_count,
           c.created_at
    FROM courses c
    LEFT JOIN users u ON u.id = c.teacher_id
"#;

pub const COURSE_COLUMNS: &str = "id, name, code, description, department_id, teacher_id, \
    credits, is_active, created_at, updated_at";

pub const ENROLLMENT_COLUMNS: &str =
    "id, student_id, course_id, status, progress, enrolled_at, completed_at";

pub async fn find_course(conn: &mut PgConnection, id: i64) -> Result<Course, AppError> {
    let sql = format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1");
    sqlx::query_as::<_, Course>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))
}

pub async fn find_enrollment(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>, AppError> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = $1 AND course_id = $2"
    );
    Ok(sqlx::query_as::<_, Enrollment>(&sql)
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// Modules of a course with their lesson headers, both in authored order.
pub async fn course_outline(conn: &mut PgConnection, course_id: i64) -> Result<Vec<ModuleOutline>, AppError> {
    let modules = sqlx::query_as::<_, Module>(
        "SELECT id, course_id, title, description, position, created_at \
         FROM modules WHERE course_id = $1 ORDER BY position, id",
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let lessons = sqlx::query_as::<_, LessonOutline>(
        r#"
        SELECT l.id, l.module_id, l.title, l.duration_minutes, l.position, l.is_free
        FROM lessons l
        JOIN modules m ON m.id = l.module_id
        WHERE m.course_id = $1
        ORDER BY l.position, l.id
        "#,
    )
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_module: HashMap<i64, Vec<LessonOutline>> = HashMap::new();
    for lesson in lessons {
        by_module.entry(lesson.module_id).or_default().push(lesson);
    }

    Ok(modules
        .into_iter()
        .map(|module| {
            let lessons = by_module.remove(&module.id).unwrap_or_default();
            ModuleOutline { module, lessons }
        })
        .collect())
}

/// Lists active courses, optionally filtered by text and department.
pub async fn list_courses(
    State(pool): State<PgPool>,
    Query(params): Query<CourseListParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(COURSE_SUMMARY_SELECT);
    builder.push(" WHERE c.is_active");

    if let Some(q) = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        let pattern = format!("%{}%", q);
        builder.push(" AND (c.name ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR c.code ILIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR c.description ILIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }

    if let Some(department) = params.department {
        builder.push(" AND c.department_id = ");
        builder.push_bind(department);
    }

    builder.push(" ORDER BY c.created_at DESC, c.id DESC");

    let courses = builder
        .build_query_as::<CourseSummary>()
        .fetch_all(&pool)
        .await?;

    Ok(Json(courses))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseDetail {
    pub course: CourseSummary,
    pub modules: Vec<ModuleOutline>,
    /// The caller's enrollment, if any.
    pub enrollment: Option<Enrollment>,
}

/// Course page. Anonymous callers see the outline only.
pub async fn get_course(
    State(pool): State<PgPool>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;

    let sql = format!("{COURSE_SUMMARY_SELECT} WHERE c.id = $1 AND c.is_active");
    let course = sqlx::query_as::<_, CourseSummary>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Course not found".to_string()))?;

    let modules = course_outline(&mut conn, id).await?;

    let enrollment = match user {
        Some(user) => {
            activity::log(
                &mut conn,
                NewActivity {
                    user_id: user.id,
                    activity_type: ActivityType::ViewCourse,
                    course_id: Some(id),
                    lesson_id: None,
                    description: course.name.clone(),
                    ip_address: client_ip(&headers),
                },
            )
            .await?;
            find_enrollment(&mut conn, user.id, id).await?
        }
        None => None,
    };

    Ok(Json(CourseDetail {
        course,
        modules,
        enrollment,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollResponse {
    pub enrollment: Enrollment,
    pub created: bool,
    pub message: String,
}

/// Enrolls the calling student. Enrolling twice is not an error.
pub async fn enroll(
    State(pool): State<PgPool>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    user.ensure_student("Only students can enroll", &format!("/courses/{}", course_id))?;

    let mut tx = pool.begin().await?;
    let course = find_course(&mut tx, course_id).await?;
    if !course.is_active {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    let sql = format!(
        "INSERT INTO enrollments (student_id, course_id) VALUES ($1, $2) \
         ON CONFLICT (student_id, course_id) DO NOTHING RETURNING {ENROLLMENT_COLUMNS}"
    );
    let inserted = sqlx::query_as::<_, Enrollment>(&sql)
        .bind(user.id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;

    let (enrollment, created, message) = match inserted {
        Some(enrollment) => {
            activity::log(
                &mut tx,
                NewActivity {
                    user_id: user.id,
                    activity_type: ActivityType::EnrollCourse,
                    course_id: Some(course_id),
                    lesson_id: None,
                    description: course.name.clone(),
                    ip_address: client_ip(&headers),
                },
            )
            .await?;
            tracing::info!("Student {} enrolled in course {}", user.id, course.code);
            (enrollment, true, format!("Enrolled in {}", course.name))
        }
        None => {
            let existing = find_enrollment(&mut tx, user.id, course_id)
                .await?
                .ok_or_else(|| AppError::InternalServerError("Enrollment vanished".to_string()))?;
            match existing.status {
                EnrollmentStatus::Dropped => {
                    let sql = format!(
                        "UPDATE enrollments SET status = 'active' WHERE id = $1 RETURNING {ENROLLMENT_COLUMNS}"
                    );
                    let reactivated = sqlx::query_as::<_, Enrollment>(&sql)
                        .bind(existing.id)
                        .fetch_one(&mut *tx)
                        .await?;
                    (reactivated, false, format!("Enrollment in {} reactivated", course.name))
                }
                EnrollmentStatus::Active | EnrollmentStatus::Completed => {
                    (existing, false, format!("Already enrolled in {}", course.name))
                }
            }
        }
    };

    tx.commit().await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(EnrollResponse { enrollment, created, message })))
}

/// Drops the caller's enrollment. Progress rows are kept.
pub async fn unenroll(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query(
        "UPDATE enrollments SET status = 'dropped' \
         WHERE student_id = $1 AND course_id = $2 AND status = 'active'",
    )
    .bind(user.id)
    .bind(course_id)
    .execute(&pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Active enrollment not found".to_string()));
    }

    tracing::info!("Student {} left course {}", user.id, course_id);
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's enrollments with progress.
pub async fn my_courses(
    State(pool): State<PgPool>,
    user: CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    let courses = sqlx::query_as::<_, MyCourse>(
        r#"
        SELECT e.id AS enrollment_id, c.id AS course_id, c.name, c.code,
               u.username AS teacher_username, e.status, e.progress, e.enrolled_at
        FROM enrollments e
        JOIN courses c ON c.id = e.course_id
        LEFT JOIN users u ON u.id = c.teacher_id
        WHERE e.student_id = $1 AND e.status <> 'dropped'
        ORDER BY e.enrolled_at DESC
        "#,
    )
    .bind(user.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(courses))
}
