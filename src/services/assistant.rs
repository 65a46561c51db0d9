//! Help-desk chat for the public site.
//!
//! With an API key configured, messages go to an OpenAI-compatible
//! chat-completion endpoint. Without one, or when that call fails in any way,
//! a keyword-matched canned answer is returned instead.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ASSISTANT_MAX_TOKENS, AssistantConfig};

/// Static facts the assistant is allowed to rely on.
const UNIVERSITY_FACTS: &str = "\
The learning portal offers online courses organised by faculty and department. \
Students register themselves, enroll in courses, study lessons module by module, \
take timed quizzes and follow their grades and attendance. \
Final grades combine quizzes (50%), assignments (30%) and attendance (20%). \
Letter grades: A from 90, B from 80, C from 70, D from 60, otherwise F.";

const SYSTEM_PREAMBLE: &str = "You are the help-desk assistant of a university learning portal. \
Answer briefly and politely, in the language of the question. \
If you do not know something, suggest contacting the dean's office.";

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Always produces an answer; failures degrade to a canned reply.
    async fn reply(&self, message: &str) -> String;
}

/// Picks the backend for the given settings.
pub fn from_config(config: &AssistantConfig) -> Arc<dyn Assistant> {
    match config.api_key.clone() {
        Some(api_key) => match RemoteAssistant::new(config, api_key) {
            Ok(remote) => {
                tracing::info!("Assistant backend: {} ({})", config.api_url, config.model);
                Arc::new(remote)
            }
            Err(e) => {
                tracing::warn!("Assistant client could not be built, using fallback: {}", e);
                Arc::new(FallbackResponder)
            }
        },
        None => {
            tracing::info!("No assistant API key set, using canned replies");
            Arc::new(FallbackResponder)
        }
    }
}

// ---------------------------------------------------------------------------
// Canned replies
// ---------------------------------------------------------------------------

/// Keyword table, checked in order. Keywords are lowercase.
const CANNED: &[(&[&str], &str)] = &[
    (
        &["register", "sign up", "account"],
        "Create an account from the registration page, choosing the student or teacher role. \
         Administrator accounts are created by the portal staff.",
    ),
    (
        &["enroll", "enrol", "join"],
        "Open a course from the catalogue and press Enroll. You can leave a course at any time \
         from the same page.",
    ),
    (
        &["quiz", "test", "exam", "attempt"],
        "Quizzes open inside their availability window. Each quiz has a limited number of attempts \
         and may be timed; an unfinished timed attempt is submitted automatically when time runs out.",
    ),
    (
        &["grade", "mark", "score"],
        "Your final grade is 50% quizzes, 30% assignments and 20% attendance. \
         A starts at 90, B at 80, C at 70 and D at 60.",
    ),
    (
        &["attendance", "absent", "late"],
        "Attendance is the share of course sessions you attended. Late and excused marks count as \
         attended, missed sessions count against you.",
    ),
    (
        &["password", "login", "log in"],
        "Use your username and password on the login page. If you lost your password, contact the \
         dean's office to have it reset.",
    ),
    (
        &["material", "download", "file", "pdf"],
        "Course materials are listed on the course page once you are enrolled.",
    ),
    (
        &["hello", "hi", "hey", "good morning"],
        "Hello! Ask me about registration, courses, quizzes, grades or attendance.",
    ),
];

const DEFAULT_REPLY: &str = "I can help with registration, enrollment, quizzes, grades and attendance. \
For anything else please contact the dean's office.";

/// Offline responder driven by `CANNED`.
pub struct FallbackResponder;

impl FallbackResponder {
    pub fn answer(message: &str) -> &'static str {
        let lowered = message.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        CANNED
            .iter()
            .find(|(keywords, _)| {
                keywords.iter().any(|kw| {
                    if kw.contains(' ') {
                        lowered.contains(kw)
                    } else {
                        words.iter().any(|w| w.starts_with(kw))
                    }
                })
            })
            .map(|(_, reply)| *reply)
            .unwrap_or(DEFAULT_REPLY)
    }
}

#[async_trait]
impl Assistant for FallbackResponder {
    async fn reply(&self, message: &str) -> String {
        Self::answer(message).to_string()
    }
}

// ---------------------------------------------------------------------------
// Remote backend
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

pub struct RemoteAssistant {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl RemoteAssistant {
    pub fn new(config: &AssistantConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    async fn complete(&self, message: &str) -> Result<String, reqwest::Error> {
        let system = format!("{}\n\n{}", SYSTEM_PREAMBLE, UNIVERSITY_FACTS);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &system },
                ChatMessage { role: "user", content: message },
            ],
            max_tokens: ASSISTANT_MAX_TOKENS,
            temperature: 0.7,
        };

        let response: ChatResponse = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Assistant for RemoteAssistant {
    async fn reply(&self, message: &str) -> String {
        match self.complete(message).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                tracing::warn!("Assistant returned an empty reply, using fallback");
                FallbackResponder::answer(message).to_string()
            }
            Err(e) => {
                tracing::warn!("Assistant request failed, using fallback: {}", e);
                FallbackResponder::answer(message).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_pick_the_matching_reply() {
        assert!(FallbackResponder::answer("How do I ENROLL in a course?").contains("Enroll"));
        assert!(FallbackResponder::answer("what are my grades").contains("50% quizzes"));
        assert!(FallbackResponder::answer("I was late twice").contains("Late"));
    }

    #[test]
    fn multi_word_keywords_match_as_phrases() {
        assert!(FallbackResponder::answer("where do I sign up?").contains("registration page"));
    }

    #[test]
    fn keywords_do_not_match_inside_other_words() {
        // "this" contains "hi" but is not a greeting.
        assert_eq!(FallbackResponder::answer("this"), DEFAULT_REPLY);
    }

    #[test]
    fn unknown_questions_get_the_default() {
        assert_eq!(FallbackResponder::answer("weather tomorrow?"), DEFAULT_REPLY);
    }

    #[tokio::test]
    async fn missing_key_uses_fallback() {
        let assistant = from_config(&AssistantConfig::default());
        let reply = assistant.reply("quiz rules").await;
        assert!(reply.contains("attempts"));
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back() {
        let config = AssistantConfig {
            api_key: Some("test".to_string()),
            api_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            timeout_secs: 2,
            ..AssistantConfig::default()
        };
        let assistant = from_config(&config);
        let reply = assistant.reply("hello").await;
        assert!(reply.starts_with("Hello!"));
    }
}
