//! Effects produced by state transitions

use super::state::{CycleId, CycleKind};
use crate::llm::Turn;
use crate::runtime::ClientEvent;

/// Effects to be executed after state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Append the user's words (plus the latest unseen frame) to history
    AppendUserTurn { text: String },

    /// Append one completed main-cycle turn
    AppendTurn { turn: Turn },

    /// Append a proactive cycle's provisional turns in one step
    CommitTurns { turns: Vec<Turn> },

    /// Spawn the cycle task
    StartCycle { cycle: CycleId, kind: CycleKind },

    /// Cancel the cycle, tear down its synthesizer stream and purge client playback
    Interrupt { cycle: CycleId },

    /// Send synthesized audio to the client
    ForwardAudio { audio: Vec<u8> },

    /// Purge client playback if the client reports it is still playing
    PurgePlayback,

    /// Notify the connected client
    Notify(ClientEvent),

    /// Reset the idle timer
    MarkActivity,

    /// End the session loop
    Shutdown,
}

impl Effect {
    pub fn notify_user_text(text: impl Into<String>) -> Self {
        Effect::Notify(ClientEvent::UserText { text: text.into() })
    }

    pub fn notify_error(message: impl Into<String>) -> Self {
        Effect::Notify(ClientEvent::Error {
            message: message.into(),
        })
    }
}
