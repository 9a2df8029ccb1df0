//! Session state types

use crate::config::SessionConfig;
use serde::Serialize;
use std::fmt;

/// Identifies one generation cycle. Events from any other cycle are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CycleId(pub u64);

impl CycleId {
    #[must_use]
    pub fn next(self) -> Self {
        CycleId(self.0 + 1)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Answering a user utterance; unbounded tool rounds
    Main,
    /// Idle-triggered check on the latest frame; bounded tool rounds, atomic commit
    Proactive,
}

/// The active generation cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle {
    pub id: CycleId,
    pub kind: CycleKind,
    /// Generation (all tool rounds) has finished
    pub generation_done: bool,
    /// The synthesizer reported the end of this cycle's audio
    pub synthesis_done: bool,
}

impl Cycle {
    pub fn new(id: CycleId, kind: CycleKind) -> Self {
        Self {
            id,
            kind,
            generation_done: false,
            synthesis_done: false,
        }
    }
}

/// Why a cycle is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// The user started speaking
    BargeIn,
    /// The client ended the session
    Stop,
}

/// Session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing in flight, waiting for the user or the idle timer
    #[default]
    Idle,

    /// A cycle is generating; no audio has reached the client yet
    AwaitingResponse { cycle: Cycle },

    /// Audio for the cycle is flowing to the client
    Speaking { cycle: Cycle },

    /// The cycle was cancelled and is unwinding.
    ///
    /// `queued` holds user speech that arrived meanwhile; it starts the next
    /// cycle once the interrupted one reports it has finished.
    Interrupted {
        cycle: Cycle,
        reason: InterruptReason,
        queued: Option<String>,
    },
}

impl SessionState {
    /// Stable name used in `state_change` events and logs
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingResponse { .. } => "awaiting_response",
            SessionState::Speaking { .. } => "speaking",
            SessionState::Interrupted { .. } => "interrupted",
        }
    }

    /// The cycle this state refers to, if any
    pub fn cycle(&self) -> Option<&Cycle> {
        match self {
            SessionState::Idle => None,
            SessionState::AwaitingResponse { cycle }
            | SessionState::Speaking { cycle }
            | SessionState::Interrupted { cycle, .. } => Some(cycle),
        }
    }

    /// A cycle is generating or speaking (not yet interrupted)
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingResponse { .. } | SessionState::Speaking { .. }
        )
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }
}

/// Per-session values the transition function reads but never changes
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub tool_type: String,
    pub config: SessionConfig,
    /// Id the next started cycle will get; the runtime advances it
    pub next_cycle: CycleId,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, tool_type: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            session_id: session_id.into(),
            tool_type: tool_type.into(),
            config,
            next_cycle: CycleId(1),
        }
    }
}
