use std::sync::Arc;

use crate::config::Config;
use crate::services::assistant::{self, Assistant};
use axum::extract::FromRef;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub assistant: Arc<dyn Assistant>,
}

impl AppState {
    /// Builds the state, picking the assistant backend from the config.
    pub fn new(pool: PgPool, config: Config) -> Self {
        let assistant = assistant::from_config(&config.assistant);
        Self {
            pool,
            config,
            assistant,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<dyn Assistant> {
    fn from_ref(state: &AppState) -> Self {
        state.assistant.clone()
    }
}
