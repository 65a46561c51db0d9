use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use crate::{
    config::{ASSIGNMENT_WEIGHT, ATTENDANCE_WEIGHT, LETTER_BANDS, QUIZ_WEIGHT},
    error::AppError,
    models::grade::{Grade, LetterGrade},
    services::attendance,
};

const GRADE_COLUMNS: &str = "id, student_id, course_id, quiz_score, attendance_score, \
    assignment_score, total_score, letter_grade, updated_at";

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Arithmetic mean, 0 for no scores.
pub fn mean_score(scores: &[i32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().map(|&s| f64::from(s)).sum::<f64>() / scores.len() as f64
}

/// Weighted total of the three components, rounded to two decimals.
pub fn weighted_total(quiz: f64, assignment: f64, attendance: f64) -> f64 {
    round2(quiz * QUIZ_WEIGHT + assignment * ASSIGNMENT_WEIGHT + attendance * ATTENDANCE_WEIGHT)
}

pub fn letter_for(total: f64) -> LetterGrade {
    LETTER_BANDS
        .iter()
        .find(|(floor, _)| total >= *floor)
        .map(|(_, letter)| *letter)
        .unwrap_or(LetterGrade::F)
}

/// Recomputes the grade row of (student, course) from current data and
/// stores it. The manually entered assignment score is preserved.
pub async fn recompute(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
    now: DateTime<Utc>,
) -> Result<Grade, AppError> {
    let scores: Vec<i32> = sqlx::query_scalar(
        r#"
        SELECT a.score
        FROM quiz_attempts a
        JOIN quizzes q ON q.id = a.quiz_id
        WHERE a.student_id = $1 AND q.course_id = $2
          AND a.completed_at IS NOT NULL AND a.score IS NOT NULL
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await?;
    let quiz_score = round2(mean_score(&scores));

    let attendance_score = f64::from(attendance::student_percentage(conn, student_id, course_id).await?);

    sqlx::query(
        "INSERT INTO grades (student_id, course_id) VALUES ($1, $2) \
         ON CONFLICT (student_id, course_id) DO NOTHING",
    )
    .bind(student_id)
    .bind(course_id)
    .execute(&mut *conn)
    .await?;

    let assignment_score: f64 = sqlx::query_scalar(
        "SELECT assignment_score FROM grades WHERE student_id = $1 AND course_id = $2 FOR UPDATE",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    let total = weighted_total(quiz_score, assignment_score, attendance_score);
    let sql = format!(
        "UPDATE grades SET quiz_score = $1, attendance_score = $2, total_score = $3, \
         letter_grade = $4, updated_at = $5 \
         WHERE student_id = $6 AND course_id = $7 RETURNING {GRADE_COLUMNS}"
    );
    let grade = sqlx::query_as::<_, Grade>(&sql)
        .bind(quiz_score)
        .bind(attendance_score)
        .bind(total)
        .bind(letter_for(total))
        .bind(now)
        .bind(student_id)
        .bind(course_id)
        .fetch_one(&mut *conn)
        .await?;

    tracing::debug!(
        "Grade for student {} in course {}: {} ({:?})",
        student_id,
        course_id,
        grade.total_score,
        grade.letter_grade
    );
    Ok(grade)
}

/// Stores a teacher-entered assignment score and recomputes the grade.
pub async fn set_assignment_score(
    conn: &mut PgConnection,
    student_id: i64,
    course_id: i64,
    score: f64,
    now: DateTime<Utc>,
) -> Result<Grade, AppError> {
    sqlx::query(
        r#"
        INSERT INTO grades (student_id, course_id, assignment_score)
        VALUES ($1, $2, $3)
        ON CONFLICT (student_id, course_id) DO UPDATE SET assignment_score = EXCLUDED.assignment_score
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .bind(score)
    .execute(&mut *conn)
    .await?;

    recompute(conn, student_id, course_id, now).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_example_lands_on_c() {
        let total = weighted_total(80.0, 70.0, 90.0);
        assert_eq!(total, 79.0);
        assert_eq!(letter_for(total), LetterGrade::C);
    }

    #[test]
    fn band_edges_are_inclusive() {
        assert_eq!(letter_for(90.0), LetterGrade::A);
        assert_eq!(letter_for(89.99), LetterGrade::B);
        assert_eq!(letter_for(80.0), LetterGrade::B);
        assert_eq!(letter_for(70.0), LetterGrade::C);
        assert_eq!(letter_for(60.0), LetterGrade::D);
        assert_eq!(letter_for(59.99), LetterGrade::F);
        assert_eq!(letter_for(0.0), LetterGrade::F);
    }

    #[test]
    fn no_quizzes_means_zero_quiz_component() {
        assert_eq!(mean_score(&[]), 0.0);
        assert_eq!(weighted_total(mean_score(&[]), 100.0, 100.0), 50.0);
    }

    #[test]
    fn mean_of_attempts() {
        assert_eq!(mean_score(&[60, 90]), 75.0);
    }

    #[test]
    fn total_is_rounded_to_cents() {
        assert_eq!(weighted_total(0.0, 0.0, 33.33), 6.67);
    }
}
