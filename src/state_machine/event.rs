//! Events that drive the session state machine

use super::state::CycleId;
use crate::llm::Turn;
use std::time::Duration;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // Transcription events
    TranscriptPartial {
        text: String,
    },
    TranscriptCommitted {
        text: String,
    },
    /// The transcription provider gave up; the session can no longer hear the user
    TranscriberFailed {
        message: String,
    },

    // Synthesis events
    SynthesisAudio {
        cycle: CycleId,
        audio: Vec<u8>,
    },
    SynthesisDone {
        cycle: CycleId,
    },

    // Cycle events
    /// A main-cycle turn (assistant response or tool results) is ready for history
    TurnCompleted {
        cycle: CycleId,
        turn: Turn,
    },
    /// A proactive cycle finished and wants all its provisional turns committed
    ProactiveCommitted {
        cycle: CycleId,
        turns: Vec<Turn>,
    },
    /// All generation rounds finished; `spoke` tells whether text went to the synthesizer
    GenerationComplete {
        cycle: CycleId,
        spoke: bool,
    },
    GenerationFailed {
        cycle: CycleId,
        message: String,
    },
    /// The cycle task observed its cancellation and stopped
    CycleUnwound {
        cycle: CycleId,
    },

    // Timer events
    IdleCheckDue {
        idle_for: Duration,
        frame_available: bool,
        client_playing: bool,
    },

    // Client events
    StopSession,
}

impl Event {
    /// Cycle the event belongs to, for stale-event filtering
    pub fn cycle(&self) -> Option<CycleId> {
        match self {
            Event::SynthesisAudio { cycle, .. }
            | Event::SynthesisDone { cycle }
            | Event::TurnCompleted { cycle, .. }
            | Event::ProactiveCommitted { cycle, .. }
            | Event::GenerationComplete { cycle, .. }
            | Event::GenerationFailed { cycle, .. }
            | Event::CycleUnwound { cycle } => Some(*cycle),
            Event::TranscriptPartial { .. }
            | Event::TranscriptCommitted { .. }
            | Event::TranscriberFailed { .. }
            | Event::IdleCheckDue { .. }
            | Event::StopSession => None,
        }
    }

    /// Whether this is the last event a cycle task emits
    pub fn is_cycle_terminal(&self) -> bool {
        matches!(
            self,
            Event::GenerationComplete { .. } | Event::GenerationFailed { .. } | Event::CycleUnwound { .. }
        )
    }
}
