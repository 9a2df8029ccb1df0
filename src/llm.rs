//! LLM provider abstraction
//!
//! Provides a common streaming interface for the language model that drives
//! the conversation and the tutorial generator.

mod anthropic;
mod error;
mod types;

pub use anthropic::AnthropicService;
pub use error::{LlmError, LlmErrorKind};
pub use types::*;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Common interface for LLM providers
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Make a streaming completion request.
    ///
    /// Text deltas are sent on `deltas` in arrival order while the request is
    /// in flight; the assembled response is returned once the stream ends.
    /// Dropping the returned future aborts the underlying connection.
    async fn stream(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError>;

    /// Make a completion request, discarding intermediate deltas
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let (deltas, _) = mpsc::unbounded_channel();
        self.stream(request, deltas).await
    }

    /// Get the model ID
    fn model_id(&self) -> &str;
}

/// Build the configured LLM service, wrapped with logging.
///
/// Returns `None` when no API key is configured and no gateway is set.
pub fn service_from_config(config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
    // In gateway mode the gateway handles authentication
    let api_key = match (&config.anthropic_api_key, &config.gateway) {
        (Some(key), _) if !key.is_empty() => key.clone(),
        (_, Some(_)) => "implicit".to_string(),
        _ => return None,
    };

    let service = AnthropicService::new(
        api_key,
        config.model.clone(),
        config.gateway.as_deref(),
        config.max_tokens,
    );
    Some(Arc::new(LoggingService::new(Arc::new(service))))
}

/// Logging wrapper for LLM services
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
    model_id: String,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn stream(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let start = std::time::Instant::now();
        let images = request.messages.iter().filter(|t| t.has_image()).count();
        let result = self.inner.stream(request, deltas).await;
        let duration = start.elapsed();

        match &result {
            Ok(response) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    turns = request.messages.len(),
                    images,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    cache_read_tokens = response.usage.cache_read_tokens,
                    cache_creation_tokens = response.usage.cache_creation_tokens,
                    tool_uses = response.tool_uses().len(),
                    "LLM request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    transient = e.kind.is_transient(),
                    "LLM request failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
