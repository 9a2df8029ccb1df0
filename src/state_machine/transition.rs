//! Pure state transition function
//!
//! Given the current state, the session context and one event, decides the
//! next state and the effects the runtime must execute. No I/O happens here.

use super::state::{Cycle, CycleId, CycleKind, InterruptReason, SessionContext, SessionState};
use super::{Effect, Event};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Stale event for cycle {got} (current: {current:?})")]
    StaleCycle {
        got: CycleId,
        current: Option<CycleId>,
    },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    if let Some(got) = event.cycle() {
        let current = state.cycle().map(|c| c.id);
        if current != Some(got) {
            return Err(TransitionError::StaleCycle { got, current });
        }
    }

    match (state, event) {
        (state, Event::TranscriberFailed { message }) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::notify_error(message)))
        }

        // ============================================================
        // Idle
        // ============================================================

        (SessionState::Idle, Event::TranscriptCommitted { text }) => {
            let Some(text) = normalize(&text) else {
                return Ok(TransitionResult::new(SessionState::Idle));
            };
            Ok(start_main_cycle(context, text.clone())
                .with_effect(Effect::notify_user_text(text))
                .with_effect(Effect::MarkActivity))
        }

        // Speech while idle can still overlap audio the client is playing
        (SessionState::Idle, Event::TranscriptPartial { .. }) => {
            Ok(TransitionResult::new(SessionState::Idle)
                .with_effect(Effect::PurgePlayback)
                .with_effect(Effect::MarkActivity))
        }

        (
            SessionState::Idle,
            Event::IdleCheckDue {
                idle_for,
                frame_available,
                client_playing,
            },
        ) => {
            if idle_for >= context.config.idle_threshold && frame_available && !client_playing {
                let cycle = Cycle::new(context.next_cycle, CycleKind::Proactive);
                Ok(TransitionResult::new(SessionState::AwaitingResponse { cycle })
                    .with_effect(Effect::StartCycle {
                        cycle: context.next_cycle,
                        kind: CycleKind::Proactive,
                    }))
            } else {
                Ok(TransitionResult::new(SessionState::Idle))
            }
        }

        (SessionState::Idle, Event::StopSession) => {
            Ok(TransitionResult::new(SessionState::Idle).with_effect(Effect::Shutdown))
        }

        // ============================================================
        // Active cycle (AwaitingResponse / Speaking)
        // ============================================================

        // Barge-in: any user speech tears the cycle down
        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::TranscriptPartial { .. },
        ) => Ok(interrupt(context, cycle, InterruptReason::BargeIn, None)),

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::TranscriptCommitted { text },
        ) => {
            let Some(text) = normalize(&text) else {
                return Ok(TransitionResult::new(state.clone()));
            };
            Ok(
                interrupt(context, cycle, InterruptReason::BargeIn, Some(text.clone()))
                    .with_effect(Effect::notify_user_text(text)),
            )
        }

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::StopSession,
        ) => Ok(interrupt(context, cycle, InterruptReason::Stop, None)),

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::SynthesisAudio { audio, .. },
        ) => Ok(TransitionResult::new(SessionState::Speaking {
            cycle: cycle.clone(),
        })
        .with_effect(Effect::ForwardAudio { audio })),

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::TurnCompleted { turn, .. },
        ) if cycle.kind == CycleKind::Main => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::AppendTurn { turn }))
        }

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::ProactiveCommitted { turns, .. },
        ) if cycle.kind == CycleKind::Proactive => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::CommitTurns { turns }))
        }

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::GenerationComplete { spoke, .. },
        ) => {
            if !spoke || cycle.synthesis_done {
                return Ok(finish_cycle());
            }
            let mut cycle = cycle.clone();
            cycle.generation_done = true;
            Ok(TransitionResult::new(with_cycle(state, cycle)))
        }

        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::SynthesisDone { .. },
        ) => {
            if cycle.generation_done {
                return Ok(finish_cycle());
            }
            let mut cycle = cycle.clone();
            cycle.synthesis_done = true;
            Ok(TransitionResult::new(with_cycle(state, cycle)))
        }

        // Audio already queued from the failed answer is purged with the error
        (
            SessionState::AwaitingResponse { cycle } | SessionState::Speaking { cycle },
            Event::GenerationFailed { message, .. },
        ) => Ok(TransitionResult::new(SessionState::Idle).with_effects([
            Effect::Interrupt { cycle: cycle.id },
            Effect::MarkActivity,
            Effect::notify_error(message),
        ])),

        (
            SessionState::AwaitingResponse { .. } | SessionState::Speaking { .. },
            Event::CycleUnwound { .. },
        ) => Ok(finish_cycle()),

        // Idle checks never compete with an active cycle
        (
            SessionState::AwaitingResponse { .. } | SessionState::Speaking { .. },
            Event::IdleCheckDue { .. },
        ) => Ok(TransitionResult::new(state.clone())),

        // ============================================================
        // Interrupted: wait for the cycle to unwind
        // ============================================================

        // Audio still in flight from the cancelled stream is dropped
        (SessionState::Interrupted { .. }, Event::SynthesisAudio { .. } | Event::SynthesisDone { .. })
        | (SessionState::Interrupted { .. }, Event::TranscriptPartial { .. } | Event::IdleCheckDue { .. })
        | (
            SessionState::Interrupted {
                reason: InterruptReason::Stop,
                ..
            },
            Event::TranscriptCommitted { .. } | Event::StopSession,
        ) => Ok(TransitionResult::new(state.clone())),

        (
            SessionState::Interrupted {
                cycle,
                reason: InterruptReason::BargeIn,
                queued,
            },
            Event::TranscriptCommitted { text },
        ) => {
            let Some(text) = normalize(&text) else {
                return Ok(TransitionResult::new(state.clone()));
            };
            let joined = match queued {
                Some(existing) => format!("{existing} {text}"),
                None => text.clone(),
            };
            Ok(TransitionResult::new(SessionState::Interrupted {
                cycle: cycle.clone(),
                reason: InterruptReason::BargeIn,
                queued: Some(joined),
            })
            .with_effect(Effect::notify_user_text(text)))
        }

        (SessionState::Interrupted { cycle, .. }, Event::StopSession) => {
            Ok(TransitionResult::new(SessionState::Interrupted {
                cycle: cycle.clone(),
                reason: InterruptReason::Stop,
                queued: None,
            }))
        }

        // The response was produced before the cancel landed; keep it for sanitization
        (SessionState::Interrupted { cycle, .. }, Event::TurnCompleted { turn, .. })
            if cycle.kind == CycleKind::Main =>
        {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::AppendTurn { turn }))
        }

        // A cancelled proactive check leaves no trace
        (SessionState::Interrupted { .. }, Event::ProactiveCommitted { .. }) => {
            Ok(TransitionResult::new(state.clone()))
        }

        (SessionState::Interrupted { reason, queued, .. }, event) if event.is_cycle_terminal() => {
            Ok(settle(context, *reason, queued.clone()))
        }

        // ============================================================
        // Invalid Transitions
        // ============================================================

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {} with event {:?}",
            state.name(),
            event
        ))),
    }
}

// Helper functions

fn normalize(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn start_main_cycle(context: &SessionContext, text: String) -> TransitionResult {
    let cycle = Cycle::new(context.next_cycle, CycleKind::Main);
    TransitionResult::new(SessionState::AwaitingResponse { cycle }).with_effects([
        Effect::AppendUserTurn { text },
        Effect::StartCycle {
            cycle: context.next_cycle,
            kind: CycleKind::Main,
        },
    ])
}

/// Tear down the active cycle.
///
/// Once generation is done the cycle task has already reported its terminal
/// event, so nothing would ever release an `Interrupted` state; settle at once.
fn interrupt(
    context: &SessionContext,
    cycle: &Cycle,
    reason: InterruptReason,
    queued: Option<String>,
) -> TransitionResult {
    let teardown = [Effect::Interrupt { cycle: cycle.id }, Effect::MarkActivity];
    if cycle.generation_done {
        let settled = settle(context, reason, queued);
        return TransitionResult::new(settled.new_state)
            .with_effects(teardown)
            .with_effects(settled.effects);
    }
    TransitionResult::new(SessionState::Interrupted {
        cycle: cycle.clone(),
        reason,
        queued,
    })
    .with_effects(teardown)
}

/// Where an interrupted session goes once its cycle is gone
fn settle(
    context: &SessionContext,
    reason: InterruptReason,
    queued: Option<String>,
) -> TransitionResult {
    match (reason, queued) {
        (InterruptReason::Stop, _) => {
            TransitionResult::new(SessionState::Idle).with_effect(Effect::Shutdown)
        }
        (InterruptReason::BargeIn, Some(text)) => {
            start_main_cycle(context, text).with_effect(Effect::MarkActivity)
        }
        (InterruptReason::BargeIn, None) => finish_cycle(),
    }
}

fn finish_cycle() -> TransitionResult {
    TransitionResult::new(SessionState::Idle).with_effect(Effect::MarkActivity)
}

/// Same state variant, updated cycle bookkeeping
fn with_cycle(state: &SessionState, cycle: Cycle) -> SessionState {
    match state {
        SessionState::Speaking { .. } => SessionState::Speaking { cycle },
        _ => SessionState::AwaitingResponse { cycle },
    }
}
