//! Session runtime executor

use super::cycle::CycleRunner;
use super::idle::IdleMonitor;
use super::traits::{ResponseGenerator, SpeechSynthesizer, ToolExecutor, TranscriptSource};
use super::{ClientEvent, SessionChannels, SessionCommand};
use crate::conversation::ConversationHistory;
use crate::llm::ContentBlock;
use crate::speech::{SynthesisEvent, TranscriptEvent};
use crate::state_machine::{
    transition, CycleId, CycleKind, Effect, Event, SessionContext, SessionState, TransitionError,
};
use crate::tutorial::SharedTutorial;
use base64::Engine;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Most recent screen frame; replaced, never queued
struct LatestFrame {
    data: String,
    media_type: String,
    seq: u64,
    /// Already attached to a turn
    attached: bool,
}

struct ActiveCycle {
    id: CycleId,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Generic session runtime that can work with any generator, synthesizer,
/// tool and transcript implementations
pub struct SessionRuntime<G, S, T, R>
where
    G: ResponseGenerator + 'static,
    S: SpeechSynthesizer + 'static,
    T: ToolExecutor + 'static,
    R: TranscriptSource,
{
    context: SessionContext,
    state: SessionState,
    history: ConversationHistory,
    generator: Arc<G>,
    synthesizer: Arc<S>,
    tools: Arc<T>,
    transcriber: R,
    tutorial: SharedTutorial,
    /// Cancelled when the loop exits
    session_cancel: CancellationToken,
    commands: mpsc::Receiver<SessionCommand>,
    commands_closed: bool,
    transcripts: mpsc::UnboundedReceiver<TranscriptEvent>,
    synthesis: mpsc::UnboundedReceiver<SynthesisEvent>,
    /// Cycle tasks report here
    cycle_tx: mpsc::UnboundedSender<Event>,
    cycle_rx: mpsc::UnboundedReceiver<Event>,
    client: mpsc::UnboundedSender<ClientEvent>,
    idle: IdleMonitor,
    frame: Option<LatestFrame>,
    frames_received: u64,
    active: Option<ActiveCycle>,
    shutdown: bool,
}

impl<G, S, T, R> SessionRuntime<G, S, T, R>
where
    G: ResponseGenerator + 'static,
    S: SpeechSynthesizer + 'static,
    T: ToolExecutor + 'static,
    R: TranscriptSource,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: SessionContext,
        generator: G,
        synthesizer: S,
        tools: T,
        transcriber: R,
        tutorial: SharedTutorial,
        session_cancel: CancellationToken,
        channels: SessionChannels,
    ) -> Self {
        let (cycle_tx, cycle_rx) = mpsc::unbounded_channel();
        let idle = IdleMonitor::new(context.config.idle_check_interval);
        Self {
            context,
            state: SessionState::Idle,
            history: ConversationHistory::new(),
            generator: Arc::new(generator),
            synthesizer: Arc::new(synthesizer),
            tools: Arc::new(tools),
            transcriber,
            tutorial,
            session_cancel,
            commands: channels.commands,
            commands_closed: false,
            transcripts: channels.transcripts,
            synthesis: channels.synthesis,
            cycle_tx,
            cycle_rx,
            client: channels.client,
            idle,
            frame: None,
            frames_received: 0,
            active: None,
            shutdown: false,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            session_id = %self.context.session_id,
            tool_type = %self.context.tool_type,
            "Starting session runtime"
        );
        self.notify(ClientEvent::SessionStarted {
            session_id: self.context.session_id.clone(),
            started_at: chrono::Utc::now().to_rfc3339(),
        });
        self.idle.mark_activity();
        let mut ticker = self.idle.ticker();

        // Process events in a loop - one event at a time, in arrival order per source
        while !self.shutdown {
            let event = tokio::select! {
                biased;
                command = self.commands.recv(), if !self.commands_closed => match command {
                    Some(command) => match self.handle_command(command).await {
                        Some(event) => event,
                        None => continue,
                    },
                    None => {
                        tracing::debug!(session_id = %self.context.session_id, "Client went away");
                        self.commands_closed = true;
                        Event::StopSession
                    }
                },
                Some(transcript) = self.transcripts.recv() => match transcript {
                    TranscriptEvent::Partial(text) => Event::TranscriptPartial { text },
                    TranscriptEvent::Committed(text) => Event::TranscriptCommitted { text },
                    TranscriptEvent::Failed(message) => Event::TranscriberFailed { message },
                },
                Some(synthesis) = self.synthesis.recv() => match synthesis {
                    SynthesisEvent::Audio { cycle, audio } => Event::SynthesisAudio { cycle, audio },
                    SynthesisEvent::Done { cycle } => Event::SynthesisDone { cycle },
                },
                Some(event) = self.cycle_rx.recv() => event,
                _ = ticker.tick() => Event::IdleCheckDue {
                    idle_for: self.idle.idle_for(),
                    frame_available: self.frame.as_ref().is_some_and(|f| !f.attached),
                    client_playing: self.idle.client_playing(),
                },
            };
            self.process_event(event);
        }

        self.cleanup().await;
        tracing::info!(
            session_id = %self.context.session_id,
            turns = self.history.len(),
            "Session runtime stopped"
        );
    }

    /// Handle a transport command; returns an event when the state machine is involved
    async fn handle_command(&mut self, command: SessionCommand) -> Option<Event> {
        match command {
            SessionCommand::AudioIn(audio) => {
                if let Err(e) = self.transcriber.send_audio(audio).await {
                    tracing::debug!(session_id = %self.context.session_id, error = %e, "Dropped microphone audio");
                }
                None
            }
            SessionCommand::Frame { data, media_type } => {
                self.frames_received += 1;
                self.frame = Some(LatestFrame {
                    data,
                    media_type,
                    seq: self.frames_received,
                    attached: false,
                });
                None
            }
            SessionCommand::PlaybackStarted => {
                self.idle.set_client_playing(true);
                None
            }
            SessionCommand::PlaybackEnded => {
                self.idle.set_client_playing(false);
                None
            }
            SessionCommand::Stop => Some(Event::StopSession),
        }
    }

    fn process_event(&mut self, event: Event) {
        let finished = event.cycle().filter(|_| event.is_cycle_terminal());

        // Pure state transition
        let result = match transition(&self.state, &self.context, event) {
            Ok(r) => r,
            Err(TransitionError::StaleCycle { got, current }) => {
                tracing::trace!(cycle = %got, current = ?current, "Dropping stale event");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.context.session_id,
                    state = self.state.name(),
                    error = %e,
                    "Event rejected"
                );
                return;
            }
        };

        if let Some(id) = finished {
            if self.active.as_ref().is_some_and(|a| a.id == id) {
                self.active = None;
            }
        }

        let previous = std::mem::replace(&mut self.state, result.new_state);
        for effect in result.effects {
            self.execute_effect(effect);
        }

        if previous.name() != self.state.name() {
            tracing::debug!(
                session_id = %self.context.session_id,
                from = previous.name(),
                to = self.state.name(),
                "State changed"
            );
            self.notify(ClientEvent::StateChange {
                state: self.state.name().to_string(),
            });
        }
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::AppendUserTurn { text } => {
                let mut blocks = Vec::with_capacity(2);
                blocks.extend(self.take_unseen_frame());
                blocks.push(ContentBlock::text(text));
                self.history.push_user(blocks);
            }

            Effect::AppendTurn { turn } => self.history.push(turn),

            Effect::CommitTurns { turns } => {
                tracing::debug!(session_id = %self.context.session_id, count = turns.len(), "Committing proactive turns");
                self.history.commit(turns);
            }

            Effect::StartCycle { cycle, kind } => self.start_cycle(cycle, kind),

            Effect::Interrupt { cycle } => {
                if let Some(active) = self.active.as_ref().filter(|a| a.id == cycle) {
                    active.token.cancel();
                } else if matches!(&self.state, SessionState::Interrupted { cycle: c, .. } if c.id == cycle) {
                    // No task left to report back; release the state ourselves
                    tracing::warn!(session_id = %self.context.session_id, cycle = %cycle, "Interrupted cycle has no running task");
                    let _ = self.cycle_tx.send(Event::CycleUnwound { cycle });
                }
                self.synthesizer.interrupt();
                self.notify(ClientEvent::Interrupt);
                tracing::info!(session_id = %self.context.session_id, cycle = %cycle, "Cycle interrupted");
            }

            Effect::ForwardAudio { audio } => {
                self.notify(ClientEvent::AgentAudio {
                    audio: base64::engine::general_purpose::STANDARD.encode(audio),
                });
            }

            Effect::PurgePlayback => {
                if self.idle.client_playing() {
                    self.synthesizer.interrupt();
                    self.notify(ClientEvent::Interrupt);
                }
            }

            Effect::Notify(event) => self.notify(event),

            Effect::MarkActivity => self.idle.mark_activity(),

            Effect::Shutdown => self.shutdown = true,
        }
    }

    fn start_cycle(&mut self, cycle: CycleId, kind: CycleKind) {
        self.context.next_cycle = cycle.next();
        let token = self.session_cancel.child_token();
        let frame = match kind {
            CycleKind::Main => None,
            CycleKind::Proactive => self.take_unseen_frame(),
        };

        let runner = CycleRunner {
            id: cycle,
            kind,
            token: token.clone(),
            history: self.history.turns().to_vec(),
            frame,
            tool_type: self.context.tool_type.clone(),
            max_retained_images: self.context.config.max_retained_images,
            proactive_max_tool_rounds: self.context.config.proactive_max_tool_rounds,
            generator: self.generator.clone(),
            synthesizer: self.synthesizer.clone(),
            tools: self.tools.clone(),
            tutorial: self.tutorial.clone(),
            events: self.cycle_tx.clone(),
            client: self.client.clone(),
        };
        tracing::info!(session_id = %self.context.session_id, cycle = %cycle, kind = ?kind, "Starting cycle");
        let handle = tokio::spawn(runner.run());

        if let Some(previous) = self.active.replace(ActiveCycle {
            id: cycle,
            token,
            handle,
        }) {
            // Cannot happen while the transition table holds; never leave a cycle running
            tracing::error!(cycle = %previous.id, "Cycle still running when a new one started");
            previous.token.cancel();
        }
    }

    /// Latest frame as an image block, if no turn has carried it yet
    fn take_unseen_frame(&mut self) -> Option<ContentBlock> {
        let frame = self.frame.as_mut().filter(|f| !f.attached)?;
        frame.attached = true;
        tracing::debug!(session_id = %self.context.session_id, seq = frame.seq, "Attaching frame");
        Some(ContentBlock::image(frame.media_type.clone(), frame.data.clone()))
    }

    fn notify(&self, event: ClientEvent) {
        let _ = self.client.send(event);
    }

    async fn cleanup(&mut self) {
        self.session_cancel.cancel();
        if let Some(active) = self.active.take() {
            active.token.cancel();
            active.handle.abort();
        }
        self.synthesizer.interrupt();
        self.transcriber.close().await;
    }
}
