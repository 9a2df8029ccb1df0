//! WebSocket transport for tutoring sessions
//!
//! One WebSocket connection carries one session: JSON commands in, JSON
//! session events out.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::config::AppConfig;
use crate::llm::LlmService;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// `None` when no LLM credentials are configured; sessions are refused
    pub llm: Option<Arc<dyn LlmService>>,
}

impl AppState {
    pub fn new(config: AppConfig, llm: Option<Arc<dyn LlmService>>) -> Self {
        Self {
            config: Arc::new(config),
            llm,
        }
    }
}
