// src/config.rs

use std::env;
use dotenvy::dotenv;

use crate::models::grade::LetterGrade;

/// Weight of the quiz component in the final grade.
pub const QUIZ_WEIGHT: f64 = 0.5;
/// Weight of the assignment component in the final grade.
pub const ASSIGNMENT_WEIGHT: f64 = 0.3;
/// Weight of the attendance component in the final grade.
pub const ATTENDANCE_WEIGHT: f64 = 0.2;

/// Lower bounds (inclusive) of the letter grade bands, highest first.
pub const LETTER_BANDS: [(f64, LetterGrade); 4] = [
    (90.0, LetterGrade::A),
    (80.0, LetterGrade::B),
    (70.0, LetterGrade::C),
    (60.0, LetterGrade::D),
];

/// Upper bound on tokens requested from the assistant backend.
pub const ASSISTANT_MAX_TOKENS: u32 = 500;

/// Number of newest courses shown on the landing page.
pub const LANDING_COURSE_COUNT: i64 = 6;

/// Number of rows in "recent activity" panels.
pub const RECENT_ACTIVITY_LIMIT: i64 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub cors_origins: Vec<String>,
    /// Directory served under `/media` for uploaded material files.
    pub media_root: String,
    pub assistant: AssistantConfig,
}

/// Settings for the optional chat-completion backend.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| parse_list(&v))
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        let media_root = env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string());

        let defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            api_key: env::var("ASSISTANT_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            api_url: env::var("ASSISTANT_API_URL").unwrap_or(defaults.api_url),
            model: env::var("ASSISTANT_MODEL").unwrap_or(defaults.model),
            timeout_secs: env::var("ASSISTANT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
        };

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            bind_addr,
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            cors_origins,
            media_root,
            assistant,
        }
    }
}

/// Splits a comma separated env value, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_skips_blanks() {
        let list = parse_list(" http://a.test , ,http://b.test");
        assert_eq!(list, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn grade_weights_sum_to_one() {
        assert!((QUIZ_WEIGHT + ASSIGNMENT_WEIGHT + ATTENDANCE_WEIGHT - 1.0).abs() < 1e-9);
    }
}
