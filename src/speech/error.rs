//! Speech provider errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    #[error("Speech provider connection failed: {0}")]
    Connect(String),
    #[error("Speech provider protocol error: {0}")]
    Protocol(String),
    /// No stream is open (never opened, already closed, or interrupted)
    #[error("Speech stream is not open")]
    NotOpen,
    #[error("Speech provider connection closed")]
    Closed,
}

impl SpeechError {
    /// Whether reconnecting could help
    pub fn is_transient(&self) -> bool {
        matches!(self, SpeechError::Connect(_) | SpeechError::Closed)
    }
}
