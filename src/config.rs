//! Environment-driven configuration

use std::time::Duration;
use thiserror::Error;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_VOICE_ID: &str = "21m00Tcm4TlvDq8Ikwe9";
const DEFAULT_TTS_MODEL: &str = "eleven_flash_v2_5";
const DEFAULT_STT_MODEL: &str = "scribe_v2_realtime";
const DEFAULT_SAMPLE_RATE: u32 = 16_000;
const DEFAULT_IDLE_INTERVAL_SECS: u64 = 5;
const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 20;
const DEFAULT_MAX_IMAGES: usize = 3;
const DEFAULT_PROACTIVE_MAX_ROUNDS: u32 = 2;

/// Configuration problems that prevent a session from starting
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("No language model configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY.")]
    MissingLlmCredentials,
    #[error("No speech provider configured. Set ELEVENLABS_API_KEY.")]
    MissingSpeechCredentials,
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("start_session requires a non-empty tool_type (got {0:?})")]
    EmptyToolType(String),
}

/// Language model settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    pub gateway: Option<String>,
    pub model: String,
    pub max_tokens: u32,
}

/// Speech provider settings (shared by transcription and synthesis)
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub elevenlabs_api_key: Option<String>,
    pub voice_id: String,
    pub tts_model: String,
    pub stt_model: String,
    /// PCM sample rate of the microphone audio forwarded by the client
    pub sample_rate: u32,
}

/// Per-session tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub idle_check_interval: Duration,
    pub idle_threshold: Duration,
    /// How many image-bearing turns keep their images in outbound requests
    pub max_retained_images: usize,
    /// Tool-call round cap for proactive cycles
    pub proactive_max_tool_rounds: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_check_interval: Duration::from_secs(DEFAULT_IDLE_INTERVAL_SECS),
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECS),
            max_retained_images: DEFAULT_MAX_IMAGES,
            proactive_max_tool_rounds: DEFAULT_PROACTIVE_MAX_ROUNDS,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub llm: LlmConfig,
    pub speech: SpeechConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparseable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| non_empty(key).and_then(|v| v.trim().parse::<u64>().ok());

        let session_defaults = SessionConfig::default();

        Self {
            port: non_empty("VOICE_TUTOR_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            llm: LlmConfig {
                anthropic_api_key: non_empty("ANTHROPIC_API_KEY"),
                gateway: non_empty("LLM_GATEWAY"),
                model: non_empty("VOICE_TUTOR_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                max_tokens: parsed("VOICE_TUTOR_MAX_TOKENS")
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(DEFAULT_MAX_TOKENS),
            },
            speech: SpeechConfig {
                elevenlabs_api_key: non_empty("ELEVENLABS_API_KEY"),
                voice_id: non_empty("VOICE_TUTOR_VOICE_ID")
                    .unwrap_or_else(|| DEFAULT_VOICE_ID.to_string()),
                tts_model: non_empty("VOICE_TUTOR_TTS_MODEL")
                    .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
                stt_model: non_empty("VOICE_TUTOR_STT_MODEL")
                    .unwrap_or_else(|| DEFAULT_STT_MODEL.to_string()),
                sample_rate: DEFAULT_SAMPLE_RATE,
            },
            session: SessionConfig {
                idle_check_interval: parsed("VOICE_TUTOR_IDLE_INTERVAL_SECS")
                    .map_or(session_defaults.idle_check_interval, Duration::from_secs),
                idle_threshold: parsed("VOICE_TUTOR_IDLE_THRESHOLD_SECS")
                    .map_or(session_defaults.idle_threshold, Duration::from_secs),
                max_retained_images: parsed("VOICE_TUTOR_MAX_IMAGES")
                    .and_then(|v| usize::try_from(v).ok())
                    .unwrap_or(session_defaults.max_retained_images),
                proactive_max_tool_rounds: parsed("VOICE_TUTOR_PROACTIVE_MAX_ROUNDS")
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(session_defaults.proactive_max_tool_rounds),
            },
        }
    }

    /// Check that everything a session needs is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.anthropic_api_key.is_none() && self.llm.gateway.is_none() {
            return Err(ConfigError::MissingLlmCredentials);
        }
        if self.speech.elevenlabs_api_key.is_none() {
            return Err(ConfigError::MissingSpeechCredentials);
        }
        self.session.validate()
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_check_interval.is_zero() {
            return Err(ConfigError::ZeroValue("VOICE_TUTOR_IDLE_INTERVAL_SECS"));
        }
        if self.idle_threshold.is_zero() {
            return Err(ConfigError::ZeroValue("VOICE_TUTOR_IDLE_THRESHOLD_SECS"));
        }
        if self.proactive_max_tool_rounds == 0 {
            return Err(ConfigError::ZeroValue("VOICE_TUTOR_PROACTIVE_MAX_ROUNDS"));
        }
        Ok(())
    }
}

/// Validate the desktop tool a session is started for
pub fn validate_tool_type(tool_type: &str) -> Result<(), ConfigError> {
    if tool_type.trim().is_empty() {
        return Err(ConfigError::EmptyToolType(tool_type.to_string()));
    }
    Ok(())
}
