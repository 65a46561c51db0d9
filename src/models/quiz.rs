// src/models/quiz.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Quiz {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub description: String,
    /// `None` means untimed.
    pub time_limit_minutes: Option<i32>,
    /// Minimum score (inclusive, percent) needed to pass.
    pub passing_score: i32,
    pub attempts_allowed: i32,
    pub shuffle_questions: bool,
    pub show_correct_answers: bool,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Availability of a quiz relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuizStatus {
    Upcoming,
    Active,
    Expired,
    Inactive,
}

impl Quiz {
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.available_from <= now && now <= self.available_until
    }

    pub fn status(&self, now: DateTime<Utc>) -> QuizStatus {
        if now < self.available_from {
            QuizStatus::Upcoming
        } else if now > self.available_until {
            QuizStatus::Expired
        } else if self.is_active {
            QuizStatus::Active
        } else {
            QuizStatus::Inactive
        }
    }
}

/// Question kind. Stored as the `question_type` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
pub enum QuestionType {
    Single,
    Multiple,
    TrueFalse,
}

/// Represents the 'questions' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    pub question_type: QuestionType,
    pub text: String,
    pub points: i32,
    pub position: i32,
}

/// Represents the 'answers' table (answer options of a question).
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
    pub position: i32,
}

/// Represents the 'quiz_attempts' table.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    /// `None` while the attempt is in progress.
    pub completed_at: Option<DateTime<Utc>>,
    pub score: Option<i32>,
    pub points_earned: i32,
    pub points_possible: i32,
    /// Unknown until completed.
    pub is_passed: Option<bool>,
}

impl QuizAttempt {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Represents the 'student_answers' table, with its selections folded in.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StudentAnswer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub selected_answer_ids: Vec<i64>,
    pub is_correct: Option<bool>,
    pub points_earned: i32,
}

/// Answer option as shown to a student taking the quiz (no key).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicAnswer {
    pub id: i64,
    pub text: String,
}

/// Question as shown to a student taking the quiz.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PublicQuestion {
    pub id: i64,
    pub question_type: QuestionType,
    pub text: String,
    pub points: i32,
    pub answers: Vec<PublicAnswer>,
    /// Ids the student has already saved for this question.
    pub selected_answer_ids: Vec<i64>,
}

/// Question with its full answer key, for teachers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionWithAnswers {
    #[serde(flatten)]
    pub question: Question,
    pub answers: Vec<Answer>,
}

/// Row of the student's quiz list.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizListItem {
    pub quiz: Quiz,
    pub course_code: String,
    pub status: QuizStatus,
    pub attempts_count: i64,
    pub attempts_left: i64,
    pub best_score: Option<i32>,
    pub is_passed: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QuizDetail {
    pub quiz: Quiz,
    pub status: QuizStatus,
    pub question_count: i64,
    pub total_points: i64,
    pub attempts: Vec<QuizAttempt>,
    pub attempts_left: i64,
    pub ongoing_attempt: Option<QuizAttempt>,
}

/// The "take quiz" view of an in-progress attempt.
#[derive(Debug, Serialize, ToSchema)]
pub struct AttemptView {
    pub attempt: QuizAttempt,
    pub quiz_title: String,
    /// Seconds left, `None` for untimed quizzes.
    pub time_remaining: Option<i64>,
    pub questions: Vec<PublicQuestion>,
}

/// One graded question on the result page.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewedQuestion {
    pub question_id: i64,
    pub text: String,
    pub points: i32,
    pub selected_answer_ids: Vec<i64>,
    pub is_correct: bool,
    pub points_earned: i32,
    /// Only present when the quiz shows correct answers.
    pub correct_answer_ids: Option<Vec<i64>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttemptResult {
    pub attempt: QuizAttempt,
    pub quiz_title: String,
    pub passing_score: i32,
    pub questions: Vec<ReviewedQuestion>,
}

/// Outcome of opening or submitting an attempt.
#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttemptOutcome {
    InProgress(AttemptView),
    Completed {
        result: AttemptResult,
        /// True when the time limit closed the attempt.
        timed_out: bool,
        message: String,
    },
}

/// Response of `POST /quizzes/{id}/start`.
#[derive(Debug, Serialize, ToSchema)]
pub struct StartAttemptResponse {
    pub attempt_id: i64,
    /// False when an in-progress attempt was resumed.
    pub created: bool,
    pub redirect: String,
}

/// DTO for saving or submitting answers.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAnswersRequest {
    /// Key: question id. Value: selected answer ids.
    /// Questions missing from the map (or with no ids) are unanswered.
    #[serde(default)]
    pub answers: HashMap<i64, Vec<i64>>,
}

/// Aggregates shown on the teacher's quiz page.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct QuizStats {
    pub total_attempts: i64,
    pub avg_score: f64,
    pub passed_count: i64,
}

/// Completed attempt joined with the student, for result listings.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct AttemptRow {
    pub id: i64,
    pub student_id: i64,
    pub username: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: Option<i32>,
    pub points_earned: i32,
    pub points_possible: i32,
    pub is_passed: Option<bool>,
}

/// DTO for creating or replacing a quiz's settings.
#[derive(Debug, Deserialize, Validate)]
pub struct QuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 1, max = 600))]
    pub time_limit_minutes: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    #[serde(default = "default_passing_score")]
    pub passing_score: i32,
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_attempts")]
    pub attempts_allowed: i32,
    #[serde(default = "default_true")]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub show_correct_answers: bool,
    pub available_from: DateTime<Utc>,
    pub available_until: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_passing_score() -> i32 {
    60
}

fn default_attempts() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

impl QuizRequest {
    /// Field validation plus the availability window ordering.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };
        if self.available_from > self.available_until {
            errors.add(
                "available_until",
                ValidationError::new("window_reversed")
                    .with_message("available_until must not precede available_from".into()),
            );
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct AnswerOptionRequest {
    #[validate(length(min = 1, max = 500))]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// DTO for creating or replacing a question together with its options.
/// Option order follows the array order.
#[derive(Debug, Deserialize, Validate)]
pub struct QuestionRequest {
    pub question_type: QuestionType,
    #[validate(length(min = 1, max = 5000))]
    pub text: String,
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_points")]
    pub points: i32,
    #[validate(range(min = 0))]
    pub position: Option<i32>,
    #[validate(nested)]
    pub answers: Vec<AnswerOptionRequest>,
}

fn default_points() -> i32 {
    1
}

impl QuestionRequest {
    /// Field validation plus the answer-key rules:
    /// at least two options, at least one correct; single and true/false
    /// questions have exactly one correct option, true/false exactly two options.
    pub fn check(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(e) => e,
        };

        let correct = self.answers.iter().filter(|a| a.is_correct).count();
        let problem = if self.answers.len() < 2 {
            Some(("too_few_options", "At least two answer options are required"))
        } else if correct == 0 {
            Some(("no_correct_option", "At least one option must be correct"))
        } else {
            match self.question_type {
                QuestionType::Single if correct != 1 => {
                    Some(("single_needs_one_correct", "Single-choice questions need exactly one correct option"))
                }
                QuestionType::TrueFalse if self.answers.len() != 2 || correct != 1 => {
                    Some(("true_false_shape", "True/false questions need two options, one correct"))
                }
                _ => None,
            }
        };

        if let Some((code, message)) = problem {
            errors.add("answers", ValidationError::new(code).with_message(message.into()));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn quiz(now: DateTime<Utc>) -> Quiz {
        Quiz {
            id: 1,
            course_id: 1,
            title: "Midterm".to_string(),
            description: String::new(),
            time_limit_minutes: Some(30),
            passing_score: 60,
            attempts_allowed: 2,
            shuffle_questions: false,
            show_correct_answers: false,
            available_from: now - Duration::hours(1),
            available_until: now + Duration::hours(1),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn options(flags: &[bool]) -> Vec<AnswerOptionRequest> {
        flags
            .iter()
            .enumerate()
            .map(|(i, &is_correct)| AnswerOptionRequest {
                text: format!("Option {}", i),
                is_correct,
            })
            .collect()
    }

    fn question(question_type: QuestionType, flags: &[bool]) -> QuestionRequest {
        QuestionRequest {
            question_type,
            text: "What is ownership?".to_string(),
            points: 2,
            position: None,
            answers: options(flags),
        }
    }

    #[test]
    fn availability_window_is_inclusive() {
        let now = Utc::now();
        let mut q = quiz(now);
        assert!(q.is_available(now));
        q.available_from = now;
        assert!(q.is_available(now));
        q.available_until = now;
        assert!(q.is_available(now));
        q.is_active = false;
        assert!(!q.is_available(now));
        assert_eq!(q.status(now), QuizStatus::Inactive);
    }

    #[test]
    fn status_reflects_window() {
        let now = Utc::now();
        let q = quiz(now);
        assert_eq!(q.status(now), QuizStatus::Active);
        assert_eq!(q.status(now - Duration::hours(2)), QuizStatus::Upcoming);
        assert_eq!(q.status(now + Duration::hours(2)), QuizStatus::Expired);
    }

    #[test]
    fn question_needs_two_options_and_a_correct_one() {
        assert!(question(QuestionType::Multiple, &[true]).check().is_err());
        assert!(question(QuestionType::Multiple, &[false, false]).check().is_err());
        assert!(question(QuestionType::Multiple, &[true, true, false]).check().is_ok());
    }

    #[test]
    fn single_choice_needs_exactly_one_correct() {
        assert!(question(QuestionType::Single, &[true, true]).check().is_err());
        assert!(question(QuestionType::Single, &[true, false, false]).check().is_ok());
    }

    #[test]
    fn true_false_has_two_options() {
        assert!(question(QuestionType::TrueFalse, &[true, false, false]).check().is_err());
        assert!(question(QuestionType::TrueFalse, &[false, true]).check().is_ok());
    }

    #[test]
    fn reversed_window_is_rejected() {
        let now = Utc::now();
        let req = QuizRequest {
            title: "Final".to_string(),
            description: String::new(),
            time_limit_minutes: None,
            passing_score: 60,
            attempts_allowed: 1,
            shuffle_questions: true,
            show_correct_answers: false,
            available_from: now,
            available_until: now - Duration::minutes(1),
            is_active: true,
        };
        let errors = req.check().unwrap_err();
        assert!(errors.field_errors().contains_key("available_until"));
    }
}
