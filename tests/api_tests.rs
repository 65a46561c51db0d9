// tests/api_tests.rs
//
// End-to-end flows against a real Postgres. Skipped when DATABASE_URL is unset.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use lms_backend::{
    config::{AssistantConfig, Config},
    models::{
        quiz::{AttemptOutcome, SubmitAnswersRequest},
        user::Role,
    },
    routes,
    services::quiz_engine,
    state::AppState,
    utils::jwt::CurrentUser,
};
use reqwest::Client;
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Spawns the app on a random port; `None` when no database is configured.
async fn spawn_app() -> Option<String> {
    spawn_app_with_pool().await.map(|(address, _)| address)
}

/// Like `spawn_app`, also handing back the pool for direct service calls.
async fn spawn_app_with_pool() -> Option<(String, PgPool)> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url,
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600,
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        admin_username: None,
        admin_password: None,
        cors_origins: Vec::new(),
        media_root: "media".to_string(),
        assistant: AssistantConfig::default(),
    };

    let app = routes::create_router(AppState::new(pool.clone(), config));

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some((format!("http://127.0.0.1:{}", port), pool))
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..10])
}

/// Registers a user with the given role and logs in. Returns (id, token).
async fn register_and_login(client: &Client, address: &str, role: &str) -> (i64, String) {
    let username = unique(role);
    let password = "password123";

    let registered: Value = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({ "username": username, "password": password, "role": role }))
        .send()
        .await
        .expect("Register failed")
        .json()
        .await
        .unwrap();

    let login: Value = client
        .post(format!("{}/api/auth/login", address))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Login failed")
        .json()
        .await
        .unwrap();

    (
        registered["id"].as_i64().expect("user id"),
        login["token"].as_str().expect("token").to_string(),
    )
}

/// Course with one lesson and a two-question quiz, taught by `teacher`.
/// Returns the course id, the quiz id and the created questions with their keys.
async fn seed_course(client: &Client, address: &str, teacher: &str) -> (i64, i64, Vec<Value>) {
    let course: Value = client
        .post(format!("{}/api/teacher/courses", address))
        .bearer_auth(teacher)
        .json(&json!({ "name": "Databases", "code": unique("DB") }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let course_id = course["id"].as_i64().expect("course id");

    let module: Value = client
        .post(format!("{}/api/teacher/courses/{}/modules", address, course_id))
        .bearer_auth(teacher)
        .json(&json!({ "title": "Relational model" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    client
        .post(format!("{}/api/teacher/modules/{}/lessons", address, module["id"]))
        .bearer_auth(teacher)
        .json(&json!({ "title": "Keys", "content": "<p>Primary and foreign keys</p>" }))
        .send()
        .await
        .unwrap();

    let now = Utc::now();
    let quiz: Value = client
        .post(format!("{}/api/teacher/courses/{}/quizzes", address, course_id))
        .bearer_auth(teacher)
        .json(&json!({
            "title": "Week 1",
            "passing_score": 60,
            "attempts_allowed": 2,
            "shuffle_questions": false,
            "show_correct_answers": true,
            "time_limit_minutes": 30,
            "available_from": now - Duration::hours(1),
            "available_until": now + Duration::hours(1),
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let quiz_id = quiz["id"].as_i64().expect("quiz id");

    let payloads = [
        json!({
            "question_type": "multiple",
            "text": "Which are keys?",
            "answers": [
                { "text": "Primary key", "is_correct": true },
                { "text": "Foreign key", "is_correct": true },
                { "text": "Index hint", "is_correct": false },
            ],
        }),
        json!({
            "question_type": "single",
            "text": "SQL stands for",
            "answers": [
                { "text": "Structured Query Language", "is_correct": true },
                { "text": "Simple Queue Logic", "is_correct": false },
            ],
        }),
    ];

    let mut questions = Vec::new();
    for payload in payloads {
        let response = client
            .post(format!("{}/api/teacher/quizzes/{}/questions", address, quiz_id))
            .bearer_auth(teacher)
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 201);
        questions.push(response.json::<Value>().await.unwrap());
    }

    (course_id, quiz_id, questions)
}

fn answer_ids(question: &Value, correct: bool) -> Vec<i64> {
    question["answers"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["is_correct"].as_bool() == Some(correct))
        .map(|a| a["id"].as_i64().unwrap())
        .collect()
}

async fn take_quiz(client: &Client, address: &str, student: &str, quiz_id: i64, answers: Value) -> Value {
    let start = client
        .post(format!("{}/api/quizzes/{}/start", address, quiz_id))
        .bearer_auth(student)
        .send()
        .await
        .unwrap();
    assert_eq!(start.status().as_u16(), 201);
    let start: Value = start.json().await.unwrap();
    let attempt_id = start["attempt_id"].as_i64().unwrap();

    let submitted = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(student)
        .json(&json!({ "answers": answers }))
        .send()
        .await
        .unwrap();
    assert_eq!(submitted.status().as_u16(), 200);
    submitted.json().await.unwrap()
}

#[tokio::test]
async fn health_check_404() {
    let Some(address) = spawn_app().await else { return };

    let response = Client::new()
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_fails_validation() {
    let Some(address) = spawn_app().await else { return };

    let response = Client::new()
        .post(format!("{}/api/auth/register", address))
        .json(&json!({ "username": "yo", "password": "password123" }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn admin_role_cannot_be_self_registered() {
    let Some(address) = spawn_app().await else { return };

    let response = Client::new()
        .post(format!("{}/api/auth/register", address))
        .json(&json!({ "username": unique("adm"), "password": "password123", "role": "admin" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn quiz_flow_grades_and_limits_attempts() {
    let Some(address) = spawn_app().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (student_id, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;

    // Not enrolled yet
    let response = client
        .post(format!("{}/api/quizzes/{}/start", address, quiz_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let enroll = client
        .post(format!("{}/api/courses/{}/enroll", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(enroll.status().as_u16(), 201);

    let q1 = &questions[0];
    let q2 = &questions[1];

    // Attempt 1: one of two correct options on the multiple-choice question
    let partial = answer_ids(q1, true)[..1].to_vec();
    let first = take_quiz(
        &client,
        &address,
        &student,
        quiz_id,
        json!({ q1["id"].to_string(): partial, q2["id"].to_string(): answer_ids(q2, true) }),
    )
    .await;
    assert_eq!(first["state"], "completed");
    assert_eq!(first["result"]["attempt"]["score"], 50);
    assert_eq!(first["result"]["attempt"]["is_passed"], false);

    // Attempt 2: everything right
    let second = take_quiz(
        &client,
        &address,
        &student,
        quiz_id,
        json!({ q1["id"].to_string(): answer_ids(q1, true), q2["id"].to_string(): answer_ids(q2, true) }),
    )
    .await;
    assert_eq!(second["result"]["attempt"]["score"], 100);
    assert_eq!(second["result"]["attempt"]["is_passed"], true);

    // Attempt 3 is refused and nothing is created
    let third = client
        .post(format!("{}/api/quizzes/{}/start", address, quiz_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(third.status().as_u16(), 409);
    let body: Value = third.json().await.unwrap();
    assert_eq!(body["redirect"], format!("/quizzes/{}", quiz_id));

    let results: Vec<Value> = client
        .get(format!("{}/api/teacher/quizzes/{}/results", address, quiz_id))
        .bearer_auth(&teacher)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results.iter().filter(|r| r["student_id"] == student_id).count(), 2);
}

async fn enroll(client: &Client, address: &str, student: &str, course_id: i64) {
    let response = client
        .post(format!("{}/api/courses/{}/enroll", address, course_id))
        .bearer_auth(student)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
}

async fn start(client: &Client, address: &str, student: &str, quiz_id: i64) -> reqwest::Response {
    client
        .post(format!("{}/api/quizzes/{}/start", address, quiz_id))
        .bearer_auth(student)
        .send()
        .await
        .unwrap()
}

fn as_student(id: i64) -> CurrentUser {
    CurrentUser { id, role: Role::Student }
}

fn selections(pairs: &[(&Value, Vec<i64>)]) -> SubmitAnswersRequest {
    let answers: HashMap<i64, Vec<i64>> = pairs
        .iter()
        .map(|(question, ids)| (question["id"].as_i64().unwrap(), ids.clone()))
        .collect();
    SubmitAnswersRequest { answers }
}

#[tokio::test]
async fn second_start_resumes_the_open_attempt() {
    let Some(address) = spawn_app().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (_, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, _) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;

    let first = start(&client, &address, &student, quiz_id).await;
    assert_eq!(first.status().as_u16(), 201);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["created"], true);

    let second = start(&client, &address, &student, quiz_id).await;
    assert_eq!(second.status().as_u16(), 200);
    let second: Value = second.json().await.unwrap();
    assert_eq!(second["created"], false);
    assert_eq!(second["attempt_id"], first["attempt_id"]);
}

#[tokio::test]
async fn saved_draft_is_merged_into_submission() {
    let Some(address) = spawn_app().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (_, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;
    let (q1, q2) = (&questions[0], &questions[1]);

    let started: Value = start(&client, &address, &student, quiz_id).await.json().await.unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let saved = client
        .put(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student)
        .json(&json!({ "answers": { q1["id"].to_string(): answer_ids(q1, true) } }))
        .send()
        .await
        .unwrap();
    assert_eq!(saved.status().as_u16(), 200);
    let saved: Value = saved.json().await.unwrap();
    assert_eq!(saved["state"], "in_progress");

    // Only the second question is sent; the first comes from the draft
    let submitted: Value = client
        .post(format!("{}/api/attempts/{}/submit", address, attempt_id))
        .bearer_auth(&student)
        .json(&json!({ "answers": { q2["id"].to_string(): answer_ids(q2, true) } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(submitted["state"], "completed");
    assert_eq!(submitted["result"]["attempt"]["score"], 100);
}

#[tokio::test]
async fn foreign_selections_are_rejected_without_storing() {
    let Some((address, pool)) = spawn_app_with_pool().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (_, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;
    let (q1, q2) = (&questions[0], &questions[1]);

    let started: Value = start(&client, &address, &student, quiz_id).await.json().await.unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();

    let bad_payloads = [
        // an option of the other question, next to a valid entry
        json!({
            q1["id"].to_string(): answer_ids(q2, true),
            q2["id"].to_string(): answer_ids(q2, true),
        }),
        // a question from nowhere
        json!({ "9000000000": answer_ids(q1, true) }),
    ];
    for answers in bad_payloads {
        let response = client
            .put(format!("{}/api/attempts/{}/answers", address, attempt_id))
            .bearer_auth(&student)
            .json(&json!({ "answers": answers }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM student_answers WHERE attempt_id = $1")
        .bind(attempt_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(stored, 0);
}

#[tokio::test]
async fn time_limit_completes_attempt_with_saved_answers() {
    let Some((address, pool)) = spawn_app_with_pool().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (student_id, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;
    let (q1, q2) = (&questions[0], &questions[1]);
    let user = as_student(student_id);

    let started = quiz_engine::start_attempt(&pool, user, quiz_id, None, Utc::now())
        .await
        .unwrap();
    assert!(started.created);

    let draft = selections(&[(q1, answer_ids(q1, true)), (q2, answer_ids(q2, true))]);
    let saved = quiz_engine::save_answers(&pool, user, started.attempt_id, &draft, Utc::now())
        .await
        .unwrap();
    assert!(matches!(saved, AttemptOutcome::InProgress(_)));

    // 31 minutes into a 30 minute quiz
    let late = Utc::now() + Duration::minutes(31);
    match quiz_engine::open_attempt(&pool, user, started.attempt_id, late).await.unwrap() {
        AttemptOutcome::Completed { result, timed_out, .. } => {
            assert!(timed_out);
            assert!(result.attempt.completed_at.is_some());
            assert_eq!(result.attempt.score, Some(100));
        }
        AttemptOutcome::InProgress(_) => panic!("expired attempt should be completed"),
    }

    // The expired attempt used one of two tries; a fresh one can start
    let next = quiz_engine::start_attempt(&pool, user, quiz_id, None, late + Duration::minutes(1))
        .await
        .unwrap();
    assert!(next.created);
    assert_ne!(next.attempt_id, started.attempt_id);
}

#[tokio::test]
async fn concurrent_starts_share_one_attempt() {
    let Some((address, pool)) = spawn_app_with_pool().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (student_id, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, _) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;
    let user = as_student(student_id);

    let now = Utc::now();
    let (a, b) = tokio::join!(
        quiz_engine::start_attempt(&pool, user, quiz_id, None, now),
        quiz_engine::start_attempt(&pool, user, quiz_id, None, now),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.attempt_id, b.attempt_id);
    assert!(a.created ^ b.created);

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2",
    )
    .bind(quiz_id)
    .bind(student_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open, 1);
}

#[tokio::test]
async fn result_keeps_recorded_grading_after_question_edit() {
    let Some(address) = spawn_app().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (_, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;
    let (q1, q2) = (&questions[0], &questions[1]);

    let done = take_quiz(
        &client,
        &address,
        &student,
        quiz_id,
        json!({ q1["id"].to_string(): answer_ids(q1, true), q2["id"].to_string(): answer_ids(q2, true) }),
    )
    .await;
    let attempt_id = done["result"]["attempt"]["id"].as_i64().unwrap();

    // Replacing the options drops the student's stored selections
    let edited = client
        .put(format!("{}/api/teacher/questions/{}", address, q1["id"]))
        .bearer_auth(&teacher)
        .json(&json!({
            "question_type": "multiple",
            "text": "Which are keys?",
            "answers": [
                { "text": "Candidate key", "is_correct": true },
                { "text": "Foreign key", "is_correct": true },
                { "text": "Index hint", "is_correct": false },
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(edited.status().as_u16(), 200);
    let edited: Value = edited.json().await.unwrap();

    let result: Value = client
        .get(format!("{}/api/attempts/{}/result", address, attempt_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["attempt"]["score"], 100);

    let reviewed = result["questions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|q| q["question_id"] == q1["id"])
        .expect("edited question on the result page");
    assert_eq!(reviewed["is_correct"], true);
    assert_eq!(reviewed["points_earned"], q1["points"]);
    let mut shown: Vec<i64> = reviewed["correct_answer_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|id| id.as_i64().unwrap())
        .collect();
    let mut key = answer_ids(&edited, true);
    shown.sort_unstable();
    key.sort_unstable();
    assert_eq!(shown, key);
}

#[tokio::test]
async fn quiz_list_and_gradebook_count_expired_attempts() {
    let Some((address, pool)) = spawn_app_with_pool().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (_, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;
    enroll(&client, &address, &student, course_id).await;
    let (q1, q2) = (&questions[0], &questions[1]);

    let started: Value = start(&client, &address, &student, quiz_id).await.json().await.unwrap();
    let attempt_id = started["attempt_id"].as_i64().unwrap();
    client
        .put(format!("{}/api/attempts/{}/answers", address, attempt_id))
        .bearer_auth(&student)
        .json(&json!({
            "answers": { q1["id"].to_string(): answer_ids(q1, true), q2["id"].to_string(): answer_ids(q2, true) }
        }))
        .send()
        .await
        .unwrap();

    // Move the attempt past its 30 minute limit
    sqlx::query("UPDATE quiz_attempts SET started_at = started_at - INTERVAL '31 minutes' WHERE id = $1")
        .bind(attempt_id)
        .execute(&pool)
        .await
        .unwrap();

    let quizzes: Vec<Value> = client
        .get(format!("{}/api/quizzes", address))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let item = quizzes
        .iter()
        .find(|q| q["quiz"]["id"] == quiz_id)
        .expect("quiz in list");
    assert_eq!(item["attempts_count"], 1);
    assert_eq!(item["best_score"], 100);

    let gradebook: Vec<Value> = client
        .get(format!("{}/api/my/grades", address))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entry = gradebook
        .iter()
        .find(|e| e["course_id"] == course_id)
        .expect("course in gradebook");
    assert_eq!(entry["grade"]["quiz_score"], 100.0);
}

#[tokio::test]
async fn attendance_and_assignment_feed_the_grade() {
    let Some(address) = spawn_app().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (student_id, student) = register_and_login(&client, &address, "student").await;
    let (course_id, quiz_id, questions) = seed_course(&client, &address, &teacher).await;

    client
        .post(format!("{}/api/courses/{}/enroll", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();

    let all_right = json!({
        questions[0]["id"].to_string(): answer_ids(&questions[0], true),
        questions[1]["id"].to_string(): answer_ids(&questions[1], true),
    });
    take_quiz(&client, &address, &student, quiz_id, all_right).await;

    // Two sessions: present at one, absent (unlisted) at the other
    for (day, marks) in [
        ("2026-09-01", json!({ student_id.to_string(): { "status": "present" } })),
        ("2026-09-08", json!({})),
    ] {
        let session: Value = client
            .post(format!("{}/api/teacher/courses/{}/sessions", address, course_id))
            .bearer_auth(&teacher)
            .json(&json!({ "title": "Lecture", "date": day, "start_time": "09:00:00", "end_time": "10:30:00" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        let taken = client
            .post(format!("{}/api/teacher/sessions/{}/attendance", address, session["id"]))
            .bearer_auth(&teacher)
            .json(&json!({ "marks": marks }))
            .send()
            .await
            .unwrap();
        assert_eq!(taken.status().as_u16(), 200);
    }

    let graded = client
        .put(format!("{}/api/teacher/courses/{}/grades/{}", address, course_id, student_id))
        .bearer_auth(&teacher)
        .json(&json!({ "assignment_score": 80.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(graded.status().as_u16(), 200);

    let gradebook: Vec<Value> = client
        .get(format!("{}/api/my/grades", address))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entry = gradebook
        .iter()
        .find(|e| e["course_id"] == course_id)
        .expect("course in gradebook");

    // 100 * 0.5 + 80 * 0.3 + 50 * 0.2 = 84
    assert_eq!(entry["grade"]["attendance_score"], 50.0);
    assert_eq!(entry["grade"]["total_score"], 84.0);
    assert_eq!(entry["grade"]["letter_grade"], "B");

    // Another teacher cannot touch the course
    let (_, outsider) = register_and_login(&client, &address, "teacher").await;
    let denied = client
        .get(format!("{}/api/teacher/courses/{}/grades", address, course_id))
        .bearer_auth(&outsider)
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status().as_u16(), 403);
}

#[tokio::test]
async fn lesson_completion_updates_progress() {
    let Some(address) = spawn_app().await else { return };
    let client = Client::new();

    let (_, teacher) = register_and_login(&client, &address, "teacher").await;
    let (_, student) = register_and_login(&client, &address, "student").await;
    let (course_id, _, _) = seed_course(&client, &address, &teacher).await;

    client
        .post(format!("{}/api/courses/{}/enroll", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();

    let detail: Value = client
        .get(format!("{}/api/courses/{}", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let lesson_id = detail["modules"][0]["lessons"][0]["id"].as_i64().expect("lesson id");

    let done: Value = client
        .post(format!("{}/api/lessons/{}/complete", address, lesson_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(done["progress"], 100);

    // Enrolling twice is informational, not an error
    let again = client
        .post(format!("{}/api/courses/{}/enroll", address, course_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status().as_u16(), 200);
}
