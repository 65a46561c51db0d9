// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    handlers::{
        admin, analytics, auth, catalog, landing, lessons, materials, quiz, student,
        teacher::{self, courses, quizzes},
    },
    openapi::ApiDoc,
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, teacher_middleware},
};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Assembles the main application router.
///
/// * Public, authenticated, teacher and admin groups are nested under `/api`.
/// * Role groups stack the role check inside the token check.
/// * Applies global middleware (Trace, CORS) and mounts media and API docs.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let auth_layer = middleware::from_fn_with_state(state.config.clone(), auth_middleware);

    let public_routes = Router::new()
        .route("/", get(landing::landing))
        .route("/assistant/chat", post(landing::assistant_chat))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/courses", get(catalog::list_courses))
        .route("/courses/{id}", get(catalog::get_course));

    let member_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me).put(auth::update_me))
        .route("/courses/{id}/enroll", post(catalog::enroll).delete(catalog::unenroll))
        .route("/courses/{id}/materials", get(materials::course_materials))
        .route("/materials/{id}/download", get(materials::download_material))
        .route("/my/courses", get(catalog::my_courses))
        .route("/my/grades", get(student::my_grades))
        .route("/my/attendance", get(student::my_attendance))
        .route("/my/attendance/{course_id}", get(student::my_course_attendance))
        .route("/my/stats", get(analytics::my_stats))
        .route("/lessons/{id}", get(lessons::get_lesson))
        .route("/lessons/{id}/complete", post(lessons::complete_lesson))
        .route("/quizzes", get(quiz::list_quizzes))
        .route("/quizzes/{id}", get(quiz::get_quiz))
        .route("/quizzes/{id}/start", post(quiz::start_quiz))
        .route("/attempts/{id}", get(quiz::get_attempt))
        .route("/attempts/{id}/answers", put(quiz::save_answers))
        .route("/attempts/{id}/submit", post(quiz::submit_attempt))
        .route("/attempts/{id}/result", get(quiz::attempt_result))
        .layer(auth_layer.clone());

    let teacher_routes = Router::new()
        .route("/courses", get(courses::list_my_courses).post(courses::create_course))
        .route(
            "/courses/{id}",
            get(courses::get_course)
                .put(courses::update_course)
                .delete(courses::delete_course),
        )
        .route("/courses/{id}/modules", post(courses::create_module))
        .route("/modules/{id}", put(courses::update_module).delete(courses::delete_module))
        .route("/modules/{id}/lessons", post(courses::create_lesson))
        .route("/lessons/{id}", put(courses::update_lesson).delete(courses::delete_lesson))
        .route(
            "/courses/{id}/quizzes",
            get(quizzes::list_course_quizzes).post(quizzes::create_quiz),
        )
        .route(
            "/quizzes/{id}",
            get(quizzes::get_quiz)
                .put(quizzes::update_quiz)
                .delete(quizzes::delete_quiz),
        )
        .route("/quizzes/{id}/questions", post(quizzes::create_question))
        .route("/quizzes/{id}/stats", get(quizzes::get_quiz_stats))
        .route("/quizzes/{id}/results", get(quizzes::get_quiz_results))
        .route(
            "/questions/{id}",
            put(quizzes::update_question).delete(quizzes::delete_question),
        )
        .route(
            "/courses/{id}/sessions",
            get(teacher::attendance::list_sessions).post(teacher::attendance::create_session),
        )
        .route(
            "/sessions/{id}",
            put(teacher::attendance::update_session).delete(teacher::attendance::delete_session),
        )
        .route(
            "/sessions/{id}/attendance",
            get(teacher::attendance::attendance_sheet).post(teacher::attendance::take_attendance),
        )
        .route("/courses/{id}/attendance", get(teacher::attendance::course_report))
        .route("/courses/{id}/grades", get(teacher::grades::course_roster))
        .route(
            "/courses/{id}/grades/{student_id}",
            put(teacher::grades::set_assignment_score),
        )
        .route("/courses/{id}/analytics", get(teacher::analytics::course_analytics))
        .route(
            "/courses/{id}/students/{student_id}",
            get(teacher::analytics::student_progress),
        )
        .route(
            "/courses/{id}/materials",
            get(teacher::materials::list_materials).post(teacher::materials::create_material),
        )
        .route(
            "/materials/{id}",
            put(teacher::materials::update_material).delete(teacher::materials::delete_material),
        )
        // Auth first, then the role check
        .layer(middleware::from_fn(teacher_middleware))
        .layer(auth_layer.clone());

    let admin_routes = Router::new()
        .route("/users", get(admin::list_users).post(admin::create_user))
        .route("/users/{id}", put(admin::update_user).delete(admin::delete_user))
        .route("/faculties", get(admin::list_faculties).post(admin::create_faculty))
        .route("/departments", get(admin::list_departments).post(admin::create_department))
        .route("/courses/{id}/teacher", put(admin::assign_teacher))
        .route("/activity", delete(admin::purge_activity))
        .layer(middleware::from_fn(admin_middleware))
        .layer(auth_layer);

    let api = Router::new()
        .merge(public_routes)
        .merge(member_routes)
        .nest("/teacher", teacher_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api", api)
        .nest_service("/media", ServeDir::new(&state.config.media_root))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
