use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use utoipa::ToSchema;

use crate::{
    config::RECENT_ACTIVITY_LIMIT,
    error::AppError,
    handlers::{catalog::find_enrollment, teacher::owned_course},
    models::{
        activity::ActivityLog,
        attendance::CourseAttendanceSummary,
        course::Enrollment,
        grade::Grade,
        quiz::AttemptRow,
        user::StudentRef,
    },
    services::{activity, attendance, grades},
    utils::jwt::CurrentUser,
};

const TOP_STUDENT_COUNT: i64 = 5;

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct TopStudent {
    pub id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub progress: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseAnalytics {
    pub course_id: i64,
    pub total_students: i64,
    pub total_lessons: i64,
    pub total_quizzes: i64,
    pub avg_progress: f64,
    pub avg_quiz_score: f64,
    /// Share of completed attempts that passed, in percent.
    pub pass_rate: f64,
    pub total_sessions: i64,
    /// Attending marks over (sessions × active students).
    pub attendance_rate: i32,
    pub top_students: Vec<TopStudent>,
    pub recent_activity: Vec<ActivityLog>,
}

#[derive(FromRow)]
struct CourseCounters {
    total_students: i64,
    total_lessons: i64,
    total_quizzes: i64,
    avg_progress: f64,
}

#[derive(FromRow)]
struct AttemptCounters {
    completed: i64,
    passed: i64,
    avg_score: f64,
}

fn pass_rate(passed: i64, completed: i64) -> f64 {
    if completed <= 0 {
        return 0.0;
    }
    ((passed as f64 * 100.0 / completed as f64) * 100.0).round() / 100.0
}

pub async fn course_analytics(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path(course_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    owned_course(&mut conn, course_id, &user).await?;

    let counters = sqlx::query_as::<_, CourseCounters>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'active') AS total_students,
            (SELECT COUNT(*) FROM lessons l JOIN modules m ON m.id = l.module_id
              WHERE m.course_id = $1) AS total_lessons,
            (SELECT COUNT(*) FROM quizzes WHERE course_id = $1) AS total_quizzes,
            (SELECT COALESCE(AVG(progress), 0)::FLOAT8 FROM enrollments
              WHERE course_id = $1 AND status = 'active') AS avg_progress
        "#,
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let attempts = sqlx::query_as::<_, AttemptCounters>(
        r#"
        SELECT COUNT(*) AS completed,
               COUNT(*) FILTER (WHERE a.is_passed) AS passed,
               COALESCE(AVG(a.score), 0)::FLOAT8 AS avg_score
        FROM quiz_attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        WHERE q.course_id = $1 AND a.completed_at IS NOT NULL
        "#,
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let total_sessions = attendance::session_count(&mut conn, course_id).await?;
    let attending: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM attendances a
        JOIN class_sessions s ON s.id = a.session_id
        JOIN enrollments e ON e.student_id = a.student_id AND e.course_id = s.course_id
        WHERE s.course_id = $1 AND e.status = 'active' AND a.status <> 'absent'
        "#,
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;
    let counts = attendance::StatusCounts {
        present: attending,
        ..Default::default()
    };
    let attendance_rate =
        attendance::attendance_percentage(&counts, total_sessions * counters.total_students);

    let top_students = sqlx::query_as::<_, TopStudent>(
        r#"
        SELECT u.id, u.username, u.first_name, u.last_name, e.progress
        FROM enrollments e
        JOIN users u ON u.id = e.student_id
        WHERE e.course_id = $1 AND e.status = 'active'
        ORDER BY e.progress DESC, u.username
        LIMIT $2
        "#,
    )
    .bind(course_id)
    .bind(TOP_STUDENT_COUNT)
    .fetch_all(&mut *conn)
    .await?;

    let recent_activity = activity::recent_in_course(&mut conn, course_id, RECENT_ACTIVITY_LIMIT).await?;

    Ok(Json(CourseAnalytics {
        course_id,
        total_students: counters.total_students,
        total_lessons: counters.total_lessons,
        total_quizzes: counters.total_quizzes,
        avg_progress: counters.avg_progress,
        avg_quiz_score: attempts.avg_score,
        pass_rate: pass_rate(attempts.passed, attempts.completed),
        total_sessions,
        attendance_rate,
        top_students,
        recent_activity,
    }))
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct LessonCompletion {
    pub lesson_id: i64,
    pub module_title: String,
    pub title: String,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StudentProgress {
    pub student: StudentRef,
    pub enrollment: Enrollment,
    pub lessons: Vec<LessonCompletion>,
    pub attempts: Vec<AttemptRow>,
    pub attendance: CourseAttendanceSummary,
    pub grade: Grade,
}

/// Drilldown into one student of the course.
pub async fn student_progress(
    State(pool): State<PgPool>,
    user: CurrentUser,
    Path((course_id, student_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;
    let course = owned_course(&mut tx, course_id, &user).await?;

    let enrollment = find_enrollment(&mut tx, student_id, course_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Student is not enrolled in this course".to_string()))?;

    let student = sqlx::query_as::<_, StudentRef>(
        "SELECT id, username, first_name, last_name FROM users WHERE id = $1",
    )
    .bind(student_id)
    .fetch_one(&mut *tx)
    .await?;

    let lessons = sqlx::query_as::<_, LessonCompletion>(
        r#"
        SELECT l.id AS lesson_id, m.title AS module_title, l.title,
               COALESCE(lp.is_completed, FALSE) AS is_completed, lp.completed_at
        FROM lessons l
        JOIN modules m ON m.id = l.module_id
        LEFT JOIN lesson_progress lp ON lp.lesson_id = l.id AND lp.student_id = $2
        WHERE m.course_id = $1
        ORDER BY m.position, m.id, l.position, l.id
        "#,
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_all(&mut *tx)
    .await?;

    let attempts = sqlx::query_as::<_, AttemptRow>(
        r#"
        SELECT a.id, a.student_id, u.username, a.started_at, a.completed_at,
               a.score, a.points_earned, a.points_possible, a.is_passed
        FROM quiz_attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        JOIN users u ON u.id = a.student_id
        WHERE q.course_id = $1 AND a.student_id = $2
        ORDER BY a.started_at DESC
        "#,
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_all(&mut *tx)
    .await?;

    let total_sessions = attendance::session_count(&mut tx, course_id).await?;
    let counts = attendance::student_counts(&mut tx, student_id, course_id).await?;
    let grade = grades::recompute(&mut tx, student_id, course_id, Utc::now()).await?;
    tx.commit().await?;

    Ok(Json(StudentProgress {
        student,
        enrollment,
        lessons,
        attempts,
        attendance: CourseAttendanceSummary {
            course_id,
            course_code: course.code,
            course_name: course.name,
            total_sessions,
            present: counts.present,
            late: counts.late,
            absent: counts.absent,
            excused: counts.excused,
            percentage: attendance::attendance_percentage(&counts, total_sessions),
        },
        grade,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_rate_handles_no_attempts() {
        assert_eq!(pass_rate(0, 0), 0.0);
    }

    #[test]
    fn pass_rate_is_percent_with_two_decimals() {
        assert_eq!(pass_rate(1, 3), 33.33);
        assert_eq!(pass_rate(3, 4), 75.0);
    }
}
