//! Client message types

use crate::runtime::SessionCommand;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on a connection
    StartSession { tool_type: String },
    /// Base64 PCM microphone audio
    AudioIn { audio: String },
    /// Base64 screen frame
    FrameIn {
        image: String,
        #[serde(default = "default_media_type")]
        media_type: String,
    },
    StopSession,
    PlaybackStarted,
    PlaybackEnded,
}

fn default_media_type() -> String {
    "image/jpeg".to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientMessageError {
    #[error("Invalid base64 audio: {0}")]
    InvalidAudio(String),
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Session already started")]
    AlreadyStarted,
}

impl ClientMessage {
    /// Translate a message received after `start_session` into a session command
    pub fn into_command(self) -> Result<SessionCommand, ClientMessageError> {
        match self {
            ClientMessage::StartSession { .. } => Err(ClientMessageError::AlreadyStarted),
            ClientMessage::AudioIn { audio } => base64::engine::general_purpose::STANDARD
                .decode(audio)
                .map(SessionCommand::AudioIn)
                .map_err(|e| ClientMessageError::InvalidAudio(e.to_string())),
            ClientMessage::FrameIn { image, media_type } => {
                if !media_type.starts_with("image/") {
                    return Err(ClientMessageError::InvalidFrame(format!(
                        "unsupported media type {media_type}"
                    )));
                }
                // Strip a data URL prefix if the client sent one
                let data = image
                    .split_once(";base64,")
                    .map_or(image.as_str(), |(_, data)| data)
                    .trim()
                    .to_string();
                if data.is_empty() {
                    return Err(ClientMessageError::InvalidFrame("empty image".to_string()));
                }
                Ok(SessionCommand::Frame { data, media_type })
            }
            ClientMessage::StopSession => Ok(SessionCommand::Stop),
            ClientMessage::PlaybackStarted => Ok(SessionCommand::PlaybackStarted),
            ClientMessage::PlaybackEnded => Ok(SessionCommand::PlaybackEnded),
        }
    }
}

/// Response for the health check
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Configured model, if LLM credentials are present
    pub model: Option<String>,
}
