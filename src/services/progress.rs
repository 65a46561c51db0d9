use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::{error::AppError, models::course::LessonProgress};

/// `floor(100 * completed / total)`, 0 for an empty course.
pub fn progress_percent(completed: i64, total: i64) -> i32 {
    if total <= 0 {
        return 0;
    }
    ((100 * completed.clamp(0, total)) / total) as i32
}

/// Recomputes and stores the cached progress of one enrollment.
/// Returns the new value; `None` when the student is not enrolled.
pub async fn update_progress(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
) -> Result<Option<i32>, AppError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM lessons l JOIN modules m ON m.id = l.module_id WHERE m.course_id = $1",
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let completed: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM lesson_progress lp
        JOIN lessons l ON l.id = lp.lesson_id
        JOIN modules m ON m.id = l.module_id
        WHERE lp.student_id = $1 AND m.course_id = $2 AND lp.is_completed
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let progress = progress_percent(completed, total);

    let updated = sqlx::query("UPDATE enrollments SET progress = $1 WHERE student_id = $2 AND course_id = $3")
        .bind(progress)
        .bind(student_id)
        .bind(course_id)
        .execute(&mut *conn)
        .await?;

    Ok((updated.rows_affected() > 0).then_some(progress))
}

/// Refreshes every enrollment of a course, after lessons were added or removed.
pub async fn refresh_course(conn: &mut PgConnection, course_id: i64) -> Result<(), AppError> {
    let students: Vec<i64> = sqlx::query_scalar("SELECT student_id FROM enrollments WHERE course_id = $1")
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;
    for student_id in students {
        update_progress(conn, student_id, course_id).await?;
    }
    Ok(())
}

/// Get-or-create of the progress row, as done when a lesson is opened.
pub async fn touch_lesson(
    conn: &mut PgConnection,
    student_id: i64,
    lesson_id: i64,
) -> Result<LessonProgress, AppError> {
    Ok(sqlx::query_as::<_, LessonProgress>(
        r#"
        INSERT INTO lesson_progress (student_id, lesson_id)
        VALUES ($1, $2)
        ON CONFLICT (student_id, lesson_id) DO UPDATE SET student_id = EXCLUDED.student_id
        RETURNING id, student_id, lesson_id, is_completed, completed_at
        "#,
    )
    .bind(student_id)
    .bind(lesson_id)
    .fetch_one(&mut *conn)
    .await?)
}

/// Marks a lesson completed (first completion time is kept) and refreshes
/// the course progress.
pub async fn complete_lesson(
    conn: &mut PgConnection,
    student_id: i64,
    lesson_id: i64,
    course_id: i64,
    now: DateTime<Utc>,
) -> Result<i32, AppError> {
    sqlx::query(
        r#"
        INSERT INTO lesson_progress (student_id, lesson_id, is_completed, completed_at)
        VALUES ($1, $2, TRUE, $3)
        ON CONFLICT (student_id, lesson_id)
        DO UPDATE SET is_completed = TRUE,
                      completed_at = COALESCE(lesson_progress.completed_at, EXCLUDED.completed_at)
        "#,
    )
    .bind(student_id)
    .bind(lesson_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let progress = update_progress(conn, student_id, course_id).await?.unwrap_or(0);
    tracing::info!(
        "Student {} completed lesson {}, course {} progress {}%",
        student_id,
        lesson_id,
        course_id,
        progress
    );
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_course_has_zero_progress() {
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn progress_is_floored_and_reaches_hundred() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 66);
        assert_eq!(progress_percent(3, 3), 100);
    }

    #[test]
    fn progress_never_decreases_as_lessons_complete() {
        let total = 7;
        let mut last = 0;
        for done in 0..=total {
            let p = progress_percent(done, total);
            assert!(p >= last);
            last = p;
        }
        assert_eq!(last, 100);
    }
}
