//! Language model errors

use thiserror::Error;

/// Failure of one model request, classified by cause
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Malformed, message)
    }

    /// What the user sees when a spoken turn could not be answered.
    ///
    /// Provider bodies stay in the logs; only request errors carry detail.
    pub fn client_message(&self) -> String {
        match self.kind {
            LlmErrorKind::Network => {
                "Lost the connection to the language model. Please say that again.".to_string()
            }
            LlmErrorKind::RateLimit => {
                "Too many requests right now. Give it a moment and try again.".to_string()
            }
            LlmErrorKind::ServerError => {
                "The language model is overloaded. Please try again.".to_string()
            }
            LlmErrorKind::Auth => "The language model rejected the configured credentials.".to_string(),
            LlmErrorKind::InvalidRequest | LlmErrorKind::Malformed => {
                format!("Could not generate a response: {}", self.message)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Timeouts, refused connections, dropped streams
    Network,
    /// 429
    RateLimit,
    /// 5xx or a provider overload event
    ServerError,
    /// 401, 403
    Auth,
    /// 400
    InvalidRequest,
    /// Unexpected status or an unparseable stream
    Malformed,
}

impl LlmErrorKind {
    /// Asking again later may succeed
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}
