//! Quiz attempt lifecycle and exact-match auto-grading.
//!
//! An attempt moves `NotStarted -> InProgress -> Completed`. Completion happens
//! on explicit submission or, for timed quizzes, on the first access after the
//! time limit has elapsed. Scoring is all-or-nothing per question: the selected
//! option set must equal the correct option set.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use validator::{ValidationError, ValidationErrors};

use crate::{
    error::AppError,
    models::{
        activity::ActivityType,
        quiz::{
            Answer, AttemptOutcome, AttemptResult, AttemptView, PublicAnswer, PublicQuestion,
            Question, QuestionWithAnswers, Quiz, QuizAttempt, ReviewedQuestion,
            StartAttemptResponse, SubmitAnswersRequest,
        },
    },
    services::{activity, grades},
    utils::jwt::CurrentUser,
};

pub const QUIZ_COLUMNS: &str = "id, course_id, title, description, time_limit_minutes, \
    passing_score, attempts_allowed, shuffle_questions, show_correct_answers, \
    available_from, available_until, is_active, created_at, updated_at";

pub const ATTEMPT_COLUMNS: &str = "id, quiz_id, student_id, started_at, completed_at, \
    score, points_earned, points_possible, is_passed";

// ---------------------------------------------------------------------------
// Pure rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    NotStarted,
    InProgress,
    Completed,
}

pub fn attempt_state(attempt: Option<&QuizAttempt>) -> AttemptState {
    match attempt {
        None => AttemptState::NotStarted,
        Some(a) if a.is_completed() => AttemptState::Completed,
        Some(_) => AttemptState::InProgress,
    }
}

/// Answer key of one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionKey {
    pub question_id: i64,
    pub points: i32,
    pub correct: BTreeSet<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionOutcome {
    pub question_id: i64,
    pub is_correct: bool,
    pub points_earned: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptScore {
    pub points_earned: i32,
    pub points_possible: i32,
    pub score: i32,
    pub is_passed: bool,
    /// One entry per answered question.
    pub outcomes: Vec<QuestionOutcome>,
}

/// Full points iff the selection equals the correct set, otherwise zero.
pub fn grade_question(key: &QuestionKey, selected: &BTreeSet<i64>) -> QuestionOutcome {
    let is_correct = *selected == key.correct;
    QuestionOutcome {
        question_id: key.question_id,
        is_correct,
        points_earned: if is_correct { key.points } else { 0 },
    }
}

/// `floor(100 * earned / possible)`, 0 when nothing was possible.
pub fn score_percentage(earned: i64, possible: i64) -> i32 {
    if possible <= 0 {
        return 0;
    }
    ((100 * earned.max(0)) / possible) as i32
}

/// Scores an attempt. Every question counts toward `points_possible`;
/// questions without a selection earn nothing and get no outcome.
pub fn score_attempt(
    keys: &[QuestionKey],
    selections: &HashMap<i64, BTreeSet<i64>>,
    passing_score: i32,
) -> AttemptScore {
    let mut points_earned: i64 = 0;
    let mut points_possible: i64 = 0;
    let mut outcomes = Vec::new();

    for key in keys {
        points_possible += i64::from(key.points);
        if let Some(selected) = selections.get(&key.question_id) {
            let outcome = grade_question(key, selected);
            points_earned += i64::from(outcome.points_earned);
            outcomes.push(outcome);
        }
    }

    let score = score_percentage(points_earned, points_possible);
    AttemptScore {
        points_earned: points_earned as i32,
        points_possible: points_possible as i32,
        score,
        is_passed: score >= passing_score,
        outcomes,
    }
}

/// Seconds left on a timed attempt, clamped at zero. `None` when untimed.
pub fn time_remaining(
    started_at: DateTime<Utc>,
    time_limit_minutes: Option<i32>,
    now: DateTime<Utc>,
) -> Option<i64> {
    let limit = time_limit_minutes?;
    let elapsed = (now - started_at).num_seconds();
    Some((i64::from(limit) * 60 - elapsed).max(0))
}

/// True for an in-progress attempt whose time limit has elapsed.
pub fn is_expired(attempt: &QuizAttempt, quiz: &Quiz, now: DateTime<Utc>) -> bool {
    !attempt.is_completed()
        && matches!(time_remaining(attempt.started_at, quiz.time_limit_minutes, now), Some(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// Continue the in-progress attempt with this id.
    Resume(i64),
    Create,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRejection {
    NotEnrolled,
    Unavailable,
    AttemptsExhausted,
}

/// Decides whether a student may start (or resume) an attempt.
/// Checks run in order: enrollment, availability, attempt budget, resume.
pub fn evaluate_start(
    quiz: &Quiz,
    now: DateTime<Utc>,
    has_active_enrollment: bool,
    completed_attempts: i64,
    in_progress: Option<i64>,
) -> Result<StartDecision, StartRejection> {
    if !has_active_enrollment {
        return Err(StartRejection::NotEnrolled);
    }
    if !quiz.is_available(now) {
        return Err(StartRejection::Unavailable);
    }
    if completed_attempts >= i64::from(quiz.attempts_allowed) {
        return Err(StartRejection::AttemptsExhausted);
    }
    Ok(match in_progress {
        Some(id) => StartDecision::Resume(id),
        None => StartDecision::Create,
    })
}

fn rejection_error(rejection: StartRejection, quiz: &Quiz) -> AppError {
    let detail = format!("/quizzes/{}", quiz.id);
    match rejection {
        StartRejection::NotEnrolled => AppError::forbidden_to(
            "Enroll in the course to take this quiz",
            format!("/courses/{}", quiz.course_id),
        ),
        StartRejection::Unavailable => AppError::rule("This quiz is not available right now", detail),
        StartRejection::AttemptsExhausted => AppError::rule("No attempts left for this quiz", detail),
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub async fn find_quiz(conn: &mut PgConnection, quiz_id: i64) -> Result<Option<Quiz>, AppError> {
    let sql = format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = $1");
    Ok(sqlx::query_as::<_, Quiz>(&sql)
        .bind(quiz_id)
        .fetch_optional(&mut *conn)
        .await?)
}

async fn get_quiz(conn: &mut PgConnection, quiz_id: i64) -> Result<Quiz, AppError> {
    find_quiz(conn, quiz_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))
}

/// Loads an attempt owned by `student_id`, locking the row.
async fn lock_owned_attempt(
    conn: &mut PgConnection,
    attempt_id: i64,
    student_id: i64,
) -> Result<QuizAttempt, AppError> {
    let sql = format!(
        "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts WHERE id = $1 AND student_id = $2 FOR UPDATE"
    );
    sqlx::query_as::<_, QuizAttempt>(&sql)
        .bind(attempt_id)
        .bind(student_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Attempt not found".to_string()))
}

async fn in_progress_attempt(
    conn: &mut PgConnection,
    quiz_id: i64,
    student_id: i64,
) -> Result<Option<QuizAttempt>, AppError> {
    let sql = format!(
        "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts \
         WHERE quiz_id = $1 AND student_id = $2 AND completed_at IS NULL FOR UPDATE"
    );
    Ok(sqlx::query_as::<_, QuizAttempt>(&sql)
        .bind(quiz_id)
        .bind(student_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// Questions of a quiz with their options. Shuffled order is drawn by the
/// database; options keep their authored order either way.
pub async fn load_questions(
    conn: &mut PgConnection,
    quiz_id: i64,
    shuffled: bool,
) -> Result<Vec<QuestionWithAnswers>, AppError> {
    let order = if shuffled { "RANDOM()" } else { "position, id" };
    let sql = format!(
        "SELECT id, quiz_id, question_type, text, points, position \
         FROM questions WHERE quiz_id = $1 ORDER BY {order}"
    );
    let questions = sqlx::query_as::<_, Question>(&sql)
        .bind(quiz_id)
        .fetch_all(&mut *conn)
        .await?;

    let answers = sqlx::query_as::<_, Answer>(
        r#"
        SELECT a.id, a.question_id, a.text, a.is_correct, a.position
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        WHERE q.quiz_id = $1
        ORDER BY a.position, a.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_question: HashMap<i64, Vec<Answer>> = HashMap::new();
    for answer in answers {
        by_question.entry(answer.question_id).or_default().push(answer);
    }

    Ok(questions
        .into_iter()
        .map(|question| {
            let answers = by_question.remove(&question.id).unwrap_or_default();
            QuestionWithAnswers { question, answers }
        })
        .collect())
}

#[derive(FromRow)]
struct KeyRow {
    question_id: i64,
    points: i32,
    answer_id: Option<i64>,
    is_correct: Option<bool>,
}

async fn load_answer_keys(conn: &mut PgConnection, quiz_id: i64) -> Result<Vec<QuestionKey>, AppError> {
    let rows = sqlx::query_as::<_, KeyRow>(
        r#"
        SELECT q.id AS question_id, q.points, a.id AS answer_id, a.is_correct
        FROM questions q
        LEFT JOIN answers a ON a.question_id = q.id
        WHERE q.quiz_id = $1
        ORDER BY q.position, q.id, a.position, a.id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut keys: Vec<QuestionKey> = Vec::new();
    for row in rows {
        if keys.last().map(|k| k.question_id) != Some(row.question_id) {
            keys.push(QuestionKey {
                question_id: row.question_id,
                points: row.points,
                correct: BTreeSet::new(),
            });
        }
        if let (Some(answer_id), Some(true)) = (row.answer_id, row.is_correct) {
            if let Some(key) = keys.last_mut() {
                key.correct.insert(answer_id);
            }
        }
    }
    Ok(keys)
}

#[derive(FromRow)]
struct SelectionRow {
    question_id: i64,
    answer_id: Option<i64>,
}

/// Stored selections of an attempt, keyed by question.
async fn load_selections(
    conn: &mut PgConnection,
    attempt_id: i64,
) -> Result<HashMap<i64, BTreeSet<i64>>, AppError> {
    let rows = sqlx::query_as::<_, SelectionRow>(
        r#"
        SELECT sa.question_id, sas.answer_id
        FROM student_answers sa
        LEFT JOIN student_answer_selections sas ON sas.student_answer_id = sa.id
        WHERE sa.attempt_id = $1
        "#,
    )
    .bind(attempt_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut selections: HashMap<i64, BTreeSet<i64>> = HashMap::new();
    for row in rows {
        let entry = selections.entry(row.question_id).or_default();
        if let Some(answer_id) = row.answer_id {
            entry.insert(answer_id);
        }
    }
    Ok(selections)
}

#[derive(FromRow)]
struct GradedRow {
    question_id: i64,
    is_correct: Option<bool>,
    points_earned: i32,
}

/// Grading recorded for each answered question when the attempt was scored.
async fn load_grading(
    conn: &mut PgConnection,
    attempt_id: i64,
) -> Result<HashMap<i64, (bool, i32)>, AppError> {
    let rows = sqlx::query_as::<_, GradedRow>(
        "SELECT question_id, is_correct, points_earned FROM student_answers WHERE attempt_id = $1",
    )
    .bind(attempt_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.question_id, (r.is_correct.unwrap_or(false), r.points_earned)))
        .collect())
}

// ---------------------------------------------------------------------------
// Scoring and storing
// ---------------------------------------------------------------------------

/// Scores the attempt from its stored answers and marks it completed.
///
/// Rewrites every StudentAnswer's scoring fields. Running it again on a
/// completed attempt yields the same score and keeps the original
/// `completed_at`.
pub async fn calculate_score(
    conn: &mut PgConnection,
    attempt: &QuizAttempt,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<QuizAttempt, AppError> {
    let keys = load_answer_keys(conn, quiz.id).await?;
    let selections = load_selections(conn, attempt.id).await?;
    let scored = score_attempt(&keys, &selections, quiz.passing_score);

    for outcome in &scored.outcomes {
        sqlx::query(
            "UPDATE student_answers SET is_correct = $1, points_earned = $2 \
             WHERE attempt_id = $3 AND question_id = $4",
        )
        .bind(outcome.is_correct)
        .bind(outcome.points_earned)
        .bind(attempt.id)
        .bind(outcome.question_id)
        .execute(&mut *conn)
        .await?;
    }

    let sql = format!(
        "UPDATE quiz_attempts SET points_earned = $1, points_possible = $2, score = $3, \
         is_passed = $4, completed_at = COALESCE(completed_at, $5) \
         WHERE id = $6 RETURNING {ATTEMPT_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, QuizAttempt>(&sql)
        .bind(scored.points_earned)
        .bind(scored.points_possible)
        .bind(scored.score)
        .bind(scored.is_passed)
        .bind(now)
        .bind(attempt.id)
        .fetch_one(&mut *conn)
        .await?;

    tracing::info!(
        "Attempt {} scored: {}/{} points, {}%",
        updated.id,
        scored.points_earned,
        scored.points_possible,
        scored.score
    );

    Ok(updated)
}

/// Completes the attempt and refreshes everything that depends on it.
async fn complete_attempt(
    conn: &mut PgConnection,
    attempt: &QuizAttempt,
    quiz: &Quiz,
    now: DateTime<Utc>,
    description: &str,
) -> Result<QuizAttempt, AppError> {
    let completed = calculate_score(conn, attempt, quiz, now).await?;

    activity::log(
        conn,
        activity::NewActivity {
            user_id: attempt.student_id,
            activity_type: ActivityType::CompleteQuiz,
            course_id: Some(quiz.course_id),
            lesson_id: None,
            description: format!("{}: {}", quiz.title, description),
            ip_address: None,
        },
    )
    .await?;

    grades::recompute(conn, attempt.student_id, quiz.course_id, now).await?;
    Ok(completed)
}

/// Force-completes the attempt if its time limit has passed.
/// Returns the (possibly updated) attempt and whether it timed out now.
pub async fn expire_if_due(
    conn: &mut PgConnection,
    attempt: QuizAttempt,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<(QuizAttempt, bool), AppError> {
    if !is_expired(&attempt, quiz, now) {
        return Ok((attempt, false));
    }
    tracing::info!("Attempt {} passed its time limit, completing", attempt.id);
    let completed = complete_attempt(conn, &attempt, quiz, now, "time limit reached").await?;
    Ok((completed, true))
}

/// Completes any expired in-progress attempt of this student on this quiz.
pub async fn expire_stale_attempt(
    conn: &mut PgConnection,
    quiz: &Quiz,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<QuizAttempt>, AppError> {
    match in_progress_attempt(conn, quiz.id, student_id).await? {
        Some(attempt) => {
            let (attempt, _) = expire_if_due(conn, attempt, quiz, now).await?;
            Ok(if attempt.is_completed() { None } else { Some(attempt) })
        }
        None => Ok(None),
    }
}

/// Completes every expired in-progress attempt of a student, across quizzes.
/// Returns how many were completed.
pub async fn expire_student_attempts(
    conn: &mut PgConnection,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let sql = format!(
        "SELECT {ATTEMPT_COLUMNS} FROM quiz_attempts \
         WHERE student_id = $1 AND completed_at IS NULL ORDER BY id FOR UPDATE"
    );
    let open = sqlx::query_as::<_, QuizAttempt>(&sql)
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await?;

    let mut expired = 0;
    for attempt in open {
        let quiz = get_quiz(conn, attempt.quiz_id).await?;
        let (_, timed_out) = expire_if_due(conn, attempt, &quiz, now).await?;
        if timed_out {
            expired += 1;
        }
    }
    Ok(expired)
}

fn answers_error(message: String) -> AppError {
    let mut errors = ValidationErrors::new();
    errors.add(
        "answers",
        ValidationError::new("invalid_selection").with_message(message.into()),
    );
    AppError::Validation(errors)
}

#[derive(FromRow)]
struct OptionRow {
    id: i64,
    question_id: i64,
}

/// Validates a submission against the quiz and writes it over the stored
/// answers. A question with an empty selection is cleared; questions not in
/// the map keep what was saved before.
async fn store_answers(
    conn: &mut PgConnection,
    attempt: &QuizAttempt,
    answers: &HashMap<i64, Vec<i64>>,
) -> Result<(), AppError> {
    let options = sqlx::query_as::<_, OptionRow>(
        r#"
        SELECT a.id, a.question_id
        FROM answers a
        JOIN questions q ON q.id = a.question_id
        WHERE q.quiz_id = $1
        "#,
    )
    .bind(attempt.quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut owner: HashMap<i64, i64> = HashMap::new();
    let mut quiz_questions: BTreeSet<i64> = BTreeSet::new();
    for option in options {
        owner.insert(option.id, option.question_id);
        quiz_questions.insert(option.question_id);
    }

    // Validate everything before touching any row.
    let mut normalized: Vec<(i64, BTreeSet<i64>)> = Vec::with_capacity(answers.len());
    for (&question_id, selected) in answers {
        if !quiz_questions.contains(&question_id) {
            return Err(answers_error(format!("Question {} is not part of this quiz", question_id)));
        }
        let selected: BTreeSet<i64> = selected.iter().copied().collect();
        if let Some(stray) = selected.iter().find(|id| owner.get(id) != Some(&question_id)) {
            return Err(answers_error(format!(
                "Answer {} does not belong to question {}",
                stray, question_id
            )));
        }
        normalized.push((question_id, selected));
    }

    for (question_id, selected) in normalized {
        if selected.is_empty() {
            sqlx::query("DELETE FROM student_answers WHERE attempt_id = $1 AND question_id = $2")
                .bind(attempt.id)
                .bind(question_id)
                .execute(&mut *conn)
                .await?;
            continue;
        }

        let student_answer_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO student_answers (attempt_id, question_id)
            VALUES ($1, $2)
            ON CONFLICT (attempt_id, question_id)
            DO UPDATE SET is_correct = NULL, points_earned = 0
            RETURNING id
            "#,
        )
        .bind(attempt.id)
        .bind(question_id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("DELETE FROM student_answer_selections WHERE student_answer_id = $1")
            .bind(student_answer_id)
            .execute(&mut *conn)
            .await?;

        let ids: Vec<i64> = selected.into_iter().collect();
        sqlx::query(
            "INSERT INTO student_answer_selections (student_answer_id, answer_id) \
             SELECT $1, UNNEST($2::BIGINT[])",
        )
        .bind(student_answer_id)
        .bind(&ids)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// View assembly
// ---------------------------------------------------------------------------

async fn build_view(
    conn: &mut PgConnection,
    attempt: QuizAttempt,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<AttemptView, AppError> {
    let questions = load_questions(conn, quiz.id, quiz.shuffle_questions).await?;
    let selections = load_selections(conn, attempt.id).await?;

    let questions = questions
        .into_iter()
        .map(|q| PublicQuestion {
            id: q.question.id,
            question_type: q.question.question_type,
            text: q.question.text,
            points: q.question.points,
            answers: q
                .answers
                .into_iter()
                .map(|a| PublicAnswer { id: a.id, text: a.text })
                .collect(),
            selected_answer_ids: selections
                .get(&q.question.id)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default(),
        })
        .collect();

    Ok(AttemptView {
        time_remaining: time_remaining(attempt.started_at, quiz.time_limit_minutes, now),
        quiz_title: quiz.title.clone(),
        attempt,
        questions,
    })
}

async fn build_result(
    conn: &mut PgConnection,
    attempt: QuizAttempt,
    quiz: &Quiz,
) -> Result<AttemptResult, AppError> {
    let questions = load_questions(conn, quiz.id, false).await?;
    let selections = load_selections(conn, attempt.id).await?;
    let grading = load_grading(conn, attempt.id).await?;

    // Correctness comes from the stored grading; the live key only feeds
    // `correct_answer_ids`, since options may have been edited since.
    let questions = questions
        .into_iter()
        .map(|q| {
            let correct: BTreeSet<i64> =
                q.answers.iter().filter(|a| a.is_correct).map(|a| a.id).collect();
            let selected = selections.get(&q.question.id);
            let (is_correct, points_earned) =
                grading.get(&q.question.id).copied().unwrap_or((false, 0));
            ReviewedQuestion {
                question_id: q.question.id,
                text: q.question.text,
                points: q.question.points,
                selected_answer_ids: selected
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default(),
                is_correct,
                points_earned,
                correct_answer_ids: quiz
                    .show_correct_answers
                    .then(|| correct.into_iter().collect()),
            }
        })
        .collect();

    Ok(AttemptResult {
        quiz_title: quiz.title.clone(),
        passing_score: quiz.passing_score,
        attempt,
        questions,
    })
}

async fn completed_outcome(
    conn: &mut PgConnection,
    attempt: QuizAttempt,
    quiz: &Quiz,
    timed_out: bool,
    message: &str,
) -> Result<AttemptOutcome, AppError> {
    Ok(AttemptOutcome::Completed {
        result: build_result(conn, attempt, quiz).await?,
        timed_out,
        message: message.to_string(),
    })
}

const TIME_UP: &str = "Time is up. The quiz was completed automatically.";

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// `NotStarted -> InProgress`, or resume the in-progress attempt.
pub async fn start_attempt(
    pool: &PgPool,
    user: CurrentUser,
    quiz_id: i64,
    ip_address: Option<String>,
    now: DateTime<Utc>,
) -> Result<StartAttemptResponse, AppError> {
    let mut tx = pool.begin().await?;

    let quiz = get_quiz(&mut tx, quiz_id).await?;

    let enrolled: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM enrollments \
         WHERE student_id = $1 AND course_id = $2 AND status = 'active')",
    )
    .bind(user.id)
    .bind(quiz.course_id)
    .fetch_one(&mut *tx)
    .await?;

    let ongoing = if enrolled {
        expire_stale_attempt(&mut tx, &quiz, user.id, now).await?
    } else {
        None
    };

    let completed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quiz_attempts \
         WHERE quiz_id = $1 AND student_id = $2 AND completed_at IS NOT NULL",
    )
    .bind(quiz.id)
    .bind(user.id)
    .fetch_one(&mut *tx)
    .await?;

    let decision = match evaluate_start(&quiz, now, enrolled, completed, ongoing.map(|a| a.id)) {
        Ok(decision) => decision,
        Err(rejection) => {
            // Commit so a time-limit completion above is not lost.
            tx.commit().await?;
            tracing::info!("User {} may not start quiz {}: {:?}", user.id, quiz.id, rejection);
            return Err(rejection_error(rejection, &quiz));
        }
    };

    let (attempt_id, created) = match decision {
        StartDecision::Resume(id) => (id, false),
        StartDecision::Create => {
            let inserted: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO quiz_attempts (quiz_id, student_id, started_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (quiz_id, student_id) WHERE completed_at IS NULL DO NOTHING
                RETURNING id
                "#,
            )
            .bind(quiz.id)
            .bind(user.id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            match inserted {
                Some(id) => {
                    activity::log(
                        &mut tx,
                        activity::NewActivity {
                            user_id: user.id,
                            activity_type: ActivityType::StartQuiz,
                            course_id: Some(quiz.course_id),
                            lesson_id: None,
                            description: quiz.title.clone(),
                            ip_address,
                        },
                    )
                    .await?;
                    (id, true)
                }
                // A concurrent request won the race; resume its attempt.
                None => {
                    let existing = in_progress_attempt(&mut tx, quiz.id, user.id)
                        .await?
                        .ok_or_else(|| {
                            AppError::InternalServerError("In-progress attempt vanished".to_string())
                        })?;
                    (existing.id, false)
                }
            }
        }
    };

    tx.commit().await?;

    Ok(StartAttemptResponse {
        attempt_id,
        created,
        redirect: format!("/attempts/{}", attempt_id),
    })
}

/// Opens an attempt for taking. Completed attempts (including ones that
/// just ran out of time) come back as results.
pub async fn open_attempt(
    pool: &PgPool,
    user: CurrentUser,
    attempt_id: i64,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, AppError> {
    let mut tx = pool.begin().await?;
    let attempt = lock_owned_attempt(&mut tx, attempt_id, user.id).await?;
    let quiz = get_quiz(&mut tx, attempt.quiz_id).await?;

    let outcome = if attempt.is_completed() {
        completed_outcome(&mut tx, attempt, &quiz, false, "This attempt is already completed.").await?
    } else {
        let (attempt, timed_out) = expire_if_due(&mut tx, attempt, &quiz, now).await?;
        if timed_out {
            completed_outcome(&mut tx, attempt, &quiz, true, TIME_UP).await?
        } else {
            AttemptOutcome::InProgress(build_view(&mut tx, attempt, &quiz, now).await?)
        }
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Saves answers without completing the attempt.
pub async fn save_answers(
    pool: &PgPool,
    user: CurrentUser,
    attempt_id: i64,
    req: &SubmitAnswersRequest,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, AppError> {
    let mut tx = pool.begin().await?;
    let attempt = lock_owned_attempt(&mut tx, attempt_id, user.id).await?;
    let quiz = get_quiz(&mut tx, attempt.quiz_id).await?;

    if attempt.is_completed() {
        return Err(AppError::rule(
            "This attempt is already completed",
            format!("/attempts/{}/result", attempt.id),
        ));
    }

    let (attempt, timed_out) = expire_if_due(&mut tx, attempt, &quiz, now).await?;
    let outcome = if timed_out {
        completed_outcome(&mut tx, attempt, &quiz, true, TIME_UP).await?
    } else {
        store_answers(&mut tx, &attempt, &req.answers).await?;
        AttemptOutcome::InProgress(build_view(&mut tx, attempt, &quiz, now).await?)
    };

    tx.commit().await?;
    Ok(outcome)
}

/// `InProgress -> Completed` by explicit submission.
pub async fn submit_attempt(
    pool: &PgPool,
    user: CurrentUser,
    attempt_id: i64,
    req: &SubmitAnswersRequest,
    now: DateTime<Utc>,
) -> Result<AttemptOutcome, AppError> {
    let mut tx = pool.begin().await?;
    let attempt = lock_owned_attempt(&mut tx, attempt_id, user.id).await?;
    let quiz = get_quiz(&mut tx, attempt.quiz_id).await?;

    if attempt.is_completed() {
        return Err(AppError::rule(
            "This attempt is already completed",
            format!("/attempts/{}/result", attempt.id),
        ));
    }

    // An expired attempt is scored with what was stored before the deadline.
    let (attempt, timed_out) = expire_if_due(&mut tx, attempt, &quiz, now).await?;
    let outcome = if timed_out {
        completed_outcome(&mut tx, attempt, &quiz, true, TIME_UP).await?
    } else {
        store_answers(&mut tx, &attempt, &req.answers).await?;
        let completed = complete_attempt(&mut tx, &attempt, &quiz, now, "submitted").await?;
        completed_outcome(&mut tx, completed, &quiz, false, "Quiz completed.").await?
    };

    tx.commit().await?;
    Ok(outcome)
}

/// Result page of a completed attempt.
pub async fn attempt_result(
    pool: &PgPool,
    user: CurrentUser,
    attempt_id: i64,
    now: DateTime<Utc>,
) -> Result<AttemptResult, AppError> {
    let mut tx = pool.begin().await?;
    let attempt = lock_owned_attempt(&mut tx, attempt_id, user.id).await?;
    let quiz = get_quiz(&mut tx, attempt.quiz_id).await?;

    let (attempt, _) = expire_if_due(&mut tx, attempt, &quiz, now).await?;
    if !attempt.is_completed() {
        tx.commit().await?;
        return Err(AppError::rule(
            "This attempt is still in progress",
            format!("/attempts/{}", attempt.id),
        ));
    }

    let result = build_result(&mut tx, attempt, &quiz).await?;
    tx.commit().await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ids(values: &[i64]) -> BTreeSet<i64> {
        values.iter().copied().collect()
    }

    fn key(question_id: i64, points: i32, correct: &[i64]) -> QuestionKey {
        QuestionKey {
            question_id,
            points,
            correct: ids(correct),
        }
    }

    fn quiz(now: DateTime<Utc>) -> Quiz {
        Quiz {
            id: 7,
            course_id: 3,
            title: "Ownership".to_string(),
            description: String::new(),
            time_limit_minutes: Some(30),
            passing_score: 60,
            attempts_allowed: 2,
            shuffle_questions: false,
            show_correct_answers: true,
            available_from: now - Duration::days(1),
            available_until: now + Duration::days(1),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn attempt(started_at: DateTime<Utc>) -> QuizAttempt {
        QuizAttempt {
            id: 1,
            quiz_id: 7,
            student_id: 9,
            started_at,
            completed_at: None,
            score: None,
            points_earned: 0,
            points_possible: 0,
            is_passed: None,
        }
    }

    #[test]
    fn exact_match_scores_full_points() {
        let k = key(1, 5, &[10, 11]);
        let outcome = grade_question(&k, &ids(&[10, 11]));
        assert!(outcome.is_correct);
        assert_eq!(outcome.points_earned, 5);
    }

    #[test]
    fn subset_superset_and_disjoint_score_zero() {
        let k = key(1, 5, &[10, 11]);
        for selected in [ids(&[10]), ids(&[10, 11, 12]), ids(&[12]), ids(&[])] {
            let outcome = grade_question(&k, &selected);
            assert!(!outcome.is_correct, "{:?} should not be correct", selected);
            assert_eq!(outcome.points_earned, 0);
        }
    }

    #[test]
    fn unanswered_questions_still_count_toward_possible() {
        let keys = vec![key(1, 2, &[10]), key(2, 3, &[20]), key(3, 5, &[30, 31])];
        let mut selections = HashMap::new();
        selections.insert(1, ids(&[10]));
        selections.insert(3, ids(&[30]));

        let scored = score_attempt(&keys, &selections, 60);
        assert_eq!(scored.points_possible, 10);
        assert_eq!(scored.points_earned, 2);
        assert_eq!(scored.score, 20);
        assert!(!scored.is_passed);
        assert_eq!(scored.outcomes.len(), 2);
    }

    #[test]
    fn score_is_floored() {
        assert_eq!(score_percentage(2, 3), 66);
        assert_eq!(score_percentage(1, 3), 33);
        assert_eq!(score_percentage(3, 3), 100);
        assert_eq!(score_percentage(0, 0), 0);
    }

    #[test]
    fn passing_is_inclusive() {
        let keys = vec![key(1, 3, &[10]), key(2, 2, &[20])];
        let mut selections = HashMap::new();
        selections.insert(1, ids(&[10]));
        let scored = score_attempt(&keys, &selections, 60);
        assert_eq!(scored.score, 60);
        assert!(scored.is_passed);
    }

    #[test]
    fn empty_quiz_scores_zero() {
        let scored = score_attempt(&[], &HashMap::new(), 0);
        assert_eq!(scored.score, 0);
        assert_eq!(scored.points_possible, 0);
        assert!(scored.is_passed);
    }

    #[test]
    fn rescoring_is_idempotent() {
        let keys = vec![key(1, 4, &[10, 11]), key(2, 1, &[20])];
        let mut selections = HashMap::new();
        selections.insert(1, ids(&[11, 10]));
        selections.insert(2, ids(&[21]));
        let first = score_attempt(&keys, &selections, 80);
        let second = score_attempt(&keys, &selections, 80);
        assert_eq!(first, second);
        assert_eq!(first.score, 80);
        assert!(first.is_passed);
    }

    #[test]
    fn attempt_expires_at_the_limit() {
        let now = Utc::now();
        let q = quiz(now);
        assert!(is_expired(&attempt(now - Duration::minutes(31)), &q, now));
        assert!(is_expired(&attempt(now - Duration::minutes(30)), &q, now));
        assert!(!is_expired(&attempt(now - Duration::minutes(29)), &q, now));
    }

    #[test]
    fn untimed_and_completed_attempts_never_expire() {
        let now = Utc::now();
        let mut q = quiz(now);
        let mut a = attempt(now - Duration::hours(5));
        a.completed_at = Some(now - Duration::hours(4));
        assert!(!is_expired(&a, &q, now));

        q.time_limit_minutes = None;
        let a = attempt(now - Duration::hours(5));
        assert!(!is_expired(&a, &q, now));
        assert_eq!(time_remaining(a.started_at, None, now), None);
    }

    #[test]
    fn time_remaining_counts_down() {
        let now = Utc::now();
        let remaining = time_remaining(now - Duration::minutes(10), Some(30), now);
        assert_eq!(remaining, Some(20 * 60));
    }

    #[test]
    fn start_requires_enrollment_first() {
        let now = Utc::now();
        let mut q = quiz(now);
        q.is_active = false;
        assert_eq!(evaluate_start(&q, now, false, 0, None), Err(StartRejection::NotEnrolled));
    }

    #[test]
    fn start_outside_window_is_rejected() {
        let now = Utc::now();
        let q = quiz(now);
        let later = now + Duration::days(2);
        assert_eq!(evaluate_start(&q, later, true, 0, None), Err(StartRejection::Unavailable));
    }

    #[test]
    fn third_attempt_is_rejected_when_two_allowed() {
        let now = Utc::now();
        let q = quiz(now);
        assert_eq!(evaluate_start(&q, now, true, 1, None), Ok(StartDecision::Create));
        assert_eq!(
            evaluate_start(&q, now, true, 2, None),
            Err(StartRejection::AttemptsExhausted)
        );
    }

    #[test]
    fn in_progress_attempt_is_resumed() {
        let now = Utc::now();
        let q = quiz(now);
        assert_eq!(evaluate_start(&q, now, true, 1, Some(44)), Ok(StartDecision::Resume(44)));
    }

    #[test]
    fn state_follows_completion() {
        let now = Utc::now();
        assert_eq!(attempt_state(None), AttemptState::NotStarted);
        let mut a = attempt(now);
        assert_eq!(attempt_state(Some(&a)), AttemptState::InProgress);
        a.completed_at = Some(now);
        assert_eq!(attempt_state(Some(&a)), AttemptState::Completed);
    }
}
