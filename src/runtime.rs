//! Session runtime
//!
//! One runtime per connected client. The session loop owns the state machine
//! and the conversation history; generation cycles run in spawned tasks and
//! report back through the loop's event channel.

mod cycle;
mod executor;
mod idle;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::config::{validate_tool_type, AppConfig, ConfigError};
use crate::llm::LlmService;
use crate::speech::{ElevenLabsSynthesizer, ElevenLabsTranscriber, SpeechError};
use crate::state_machine::SessionContext;
use crate::tools::{SessionTools, ToolRegistry};
use crate::tutorial::{LlmTutorialGenerator, SharedTutorial, Tutorial, TutorialState, TutorialStep};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Events sent to the connected client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SessionStarted {
        session_id: String,
        /// RFC 3339
        started_at: String,
    },
    /// Committed user speech, echoed back
    UserText {
        text: String,
    },
    /// Full text of the first response round of a cycle
    AgentText {
        text: String,
    },
    /// Full text of a later round (after tool results)
    AgentTextContinue {
        text: String,
    },
    AgentTextDelta {
        text: String,
    },
    /// Base64 PCM audio
    AgentAudio {
        audio: String,
    },
    /// Stop playback and drop queued audio
    Interrupt,
    TutorialLoading {
        topic: String,
    },
    TutorialReady {
        tutorial: Tutorial,
    },
    TutorialError {
        message: String,
    },
    StepUpdate {
        /// 1-based
        step_number: usize,
        total_steps: usize,
        step: TutorialStep,
    },
    HotkeyDisplay {
        keys: Vec<String>,
        action: String,
    },
    StateChange {
        state: String,
    },
    Error {
        message: String,
    },
}

/// Commands from the transport into a running session
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Raw microphone PCM
    AudioIn(Vec<u8>),
    /// Latest screen frame, base64-encoded
    Frame { data: String, media_type: String },
    PlaybackStarted,
    PlaybackEnded,
    Stop,
}

/// Why a session could not be started
#[derive(Debug, Error)]
pub enum SessionStartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Speech recognition unavailable: {0}")]
    Speech(#[from] SpeechError),
}

/// Handle the transport holds for a running session
pub struct SessionHandle {
    pub session_id: String,
    pub commands: mpsc::Sender<SessionCommand>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

/// Type alias for the production runtime with concrete providers
pub type ProductionRuntime = SessionRuntime<
    LlmResponseGenerator,
    ElevenLabsSynthesizer,
    ToolRegistryExecutor,
    ElevenLabsTranscriber,
>;

/// Validate configuration, connect speech recognition and spawn the session loop
pub async fn start_session(
    config: &AppConfig,
    llm: Arc<dyn LlmService>,
    tool_type: &str,
) -> Result<SessionHandle, SessionStartError> {
    config.validate()?;
    validate_tool_type(tool_type)?;
    let api_key = config
        .speech
        .elevenlabs_api_key
        .clone()
        .ok_or(ConfigError::MissingSpeechCredentials)?;

    let session_id = uuid::Uuid::new_v4().to_string();
    let (command_tx, command_rx) = mpsc::channel(256);
    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
    let (synthesis_tx, synthesis_rx) = mpsc::unbounded_channel();

    let transcriber = ElevenLabsTranscriber::new(&config.speech, api_key.clone(), transcript_tx);
    transcriber.connect().await?;
    let synthesizer = ElevenLabsSynthesizer::new(&config.speech, api_key, synthesis_tx);

    let tutorial: SharedTutorial = Arc::new(RwLock::new(TutorialState::default()));
    let session_cancel = CancellationToken::new();
    let tools = ToolRegistryExecutor::new(
        ToolRegistry::standard(),
        SessionTools {
            session_id: session_id.clone(),
            tool_type: tool_type.to_string(),
            session_cancel: session_cancel.clone(),
            events: client_tx.clone(),
            tutorial: tutorial.clone(),
            generator: Arc::new(LlmTutorialGenerator::new(llm.clone())),
        },
    );

    let runtime: ProductionRuntime = SessionRuntime::new(
        SessionContext::new(session_id.clone(), tool_type, config.session.clone()),
        LlmResponseGenerator::new(llm),
        synthesizer,
        tools,
        transcriber,
        tutorial,
        session_cancel,
        SessionChannels {
            commands: command_rx,
            transcripts: transcript_rx,
            synthesis: synthesis_rx,
            client: client_tx,
        },
    );
    tokio::spawn(runtime.run());

    Ok(SessionHandle {
        session_id,
        commands: command_tx,
        events: client_rx,
    })
}

/// Channels connecting a session loop to its providers and client
pub struct SessionChannels {
    pub commands: mpsc::Receiver<SessionCommand>,
    pub transcripts: mpsc::UnboundedReceiver<crate::speech::TranscriptEvent>,
    pub synthesis: mpsc::UnboundedReceiver<crate::speech::SynthesisEvent>,
    pub client: mpsc::UnboundedSender<ClientEvent>,
}
