//! Generation cycle task
//!
//! A cycle answers one user utterance (main) or looks at the latest frame
//! after a quiet period (proactive). It runs in its own task, owns a working
//! copy of the history and reports back to the session loop. The last event
//! it sends is always `GenerationComplete`, `GenerationFailed` or
//! `CycleUnwound`.

use super::traits::{ResponseGenerator, SpeechSynthesizer, ToolExecutor};
use super::ClientEvent;
use crate::conversation::prepare_for_request;
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, Turn};
use crate::speech::SentenceStreamer;
use crate::state_machine::{CycleId, CycleKind, Event};
use crate::system_prompt::{build_system_prompt, is_silence, PROACTIVE_CHECK_PROMPT};
use crate::tools::ToolOutput;
use crate::tutorial::SharedTutorial;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Cancellation observed; unwind without reporting anything else
struct Cancelled;

/// `(id, name, input)` of one requested tool call
type ToolCall = (String, String, Value);

fn owned_tool_uses(response: &LlmResponse) -> Vec<ToolCall> {
    response
        .tool_uses()
        .into_iter()
        .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
        .collect()
}

pub(crate) struct CycleRunner<G, S, T> {
    pub id: CycleId,
    pub kind: CycleKind,
    pub token: CancellationToken,
    /// History as of cycle start
    pub history: Vec<Turn>,
    /// Frame for a proactive check
    pub frame: Option<ContentBlock>,
    pub tool_type: String,
    pub max_retained_images: usize,
    pub proactive_max_tool_rounds: u32,
    pub generator: Arc<G>,
    pub synthesizer: Arc<S>,
    pub tools: Arc<T>,
    pub tutorial: SharedTutorial,
    pub events: mpsc::UnboundedSender<Event>,
    pub client: mpsc::UnboundedSender<ClientEvent>,
}

impl<G, S, T> CycleRunner<G, S, T>
where
    G: ResponseGenerator + 'static,
    S: SpeechSynthesizer + 'static,
    T: ToolExecutor + 'static,
{
    /// Run to completion and report the terminal event
    pub async fn run(self) {
        let events = self.events.clone();
        let terminal = match self.kind {
            CycleKind::Main => self.run_main().await,
            CycleKind::Proactive => self.run_proactive().await,
        };
        let _ = events.send(terminal);
    }

    async fn run_main(&self) -> Event {
        let start = std::time::Instant::now();
        let mut turns = self.history.clone();
        let mut speech = Speech::open(self).await;
        let mut round = 0usize;

        loop {
            let request = self.request(&turns, true).await;
            let response = match self.generate_speaking(&request, &mut speech).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(cycle = %self.id, kind = ?e.kind, error = %e.message, "Generation failed");
                    return Event::GenerationFailed {
                        cycle: self.id,
                        message: e.client_message(),
                    };
                }
                Err(Cancelled) => return self.unwound(),
            };
            if self.token.is_cancelled() {
                return self.unwound();
            }

            let text = response.text();
            let tool_uses = owned_tool_uses(&response);

            let turn = response.into_turn();
            turns.push(turn.clone());
            let _ = self.events.send(Event::TurnCompleted {
                cycle: self.id,
                turn,
            });
            if !text.trim().is_empty() {
                let _ = self.client.send(if round == 0 {
                    ClientEvent::AgentText { text }
                } else {
                    ClientEvent::AgentTextContinue { text }
                });
            }

            if tool_uses.is_empty() {
                break;
            }

            // Text from separate rounds must not fuse into one sentence
            speech.dispatch_remainder(self).await;

            let results = match self.execute_tools(tool_uses).await {
                Ok(results) => results,
                Err(Cancelled) => return self.unwound(),
            };
            let results = Turn::user(results);
            turns.push(results.clone());
            let _ = self.events.send(Event::TurnCompleted {
                cycle: self.id,
                turn: results,
            });
            round += 1;
        }

        let spoke = speech.finish(self).await;
        if self.token.is_cancelled() {
            return self.unwound();
        }
        tracing::info!(
            cycle = %self.id,
            rounds = round + 1,
            spoke,
            duration_ms = %start.elapsed().as_millis(),
            "Cycle complete"
        );
        Event::GenerationComplete {
            cycle: self.id,
            spoke,
        }
    }

    /// Look at the latest frame; commit and speak only if there is something to say.
    ///
    /// Every turn stays provisional until the single commit at the end.
    async fn run_proactive(&self) -> Event {
        let Some(frame) = self.frame.clone() else {
            return Event::GenerationComplete {
                cycle: self.id,
                spoke: false,
            };
        };
        let mut provisional = vec![Turn::user(vec![frame, ContentBlock::text(PROACTIVE_CHECK_PROMPT)])];
        let mut rounds = 0u32;

        let final_text = loop {
            if self.token.is_cancelled() {
                return self.unwound();
            }
            let mut turns = self.history.clone();
            turns.extend(provisional.iter().cloned());
            // The last allowed round gets no tools so the model has to answer
            let request = self.request(&turns, rounds < self.proactive_max_tool_rounds).await;

            let response = match self.generate_silent(&request).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(cycle = %self.id, error = %e.message, "Proactive check failed");
                    return Event::GenerationComplete {
                        cycle: self.id,
                        spoke: false,
                    };
                }
                Err(Cancelled) => return self.unwound(),
            };
            if self.token.is_cancelled() {
                return self.unwound();
            }

            let text = response.text();
            let tool_uses = owned_tool_uses(&response);
            provisional.push(response.into_turn());

            if tool_uses.is_empty() || rounds >= self.proactive_max_tool_rounds {
                break text;
            }
            rounds += 1;
            match self.execute_tools(tool_uses).await {
                Ok(results) => provisional.push(Turn::user(results)),
                Err(Cancelled) => return self.unwound(),
            }
        };

        if is_silence(&final_text) {
            tracing::debug!(cycle = %self.id, "Proactive check found nothing to say");
            return Event::GenerationComplete {
                cycle: self.id,
                spoke: false,
            };
        }
        if self.token.is_cancelled() {
            return self.unwound();
        }

        let _ = self.events.send(Event::ProactiveCommitted {
            cycle: self.id,
            turns: provisional,
        });
        let _ = self.client.send(ClientEvent::AgentText {
            text: final_text.clone(),
        });

        let mut speech = Speech::open(self).await;
        if !self.token.is_cancelled() && speech.open {
            match self.synthesizer.send_text(&final_text).await {
                Ok(()) => speech.sent = true,
                Err(e) => tracing::debug!(cycle = %self.id, error = %e, "Synthesizer rejected text"),
            }
        }
        let spoke = speech.finish(self).await;
        if self.token.is_cancelled() {
            return self.unwound();
        }
        tracing::info!(cycle = %self.id, rounds, "Proactive comment delivered");
        Event::GenerationComplete {
            cycle: self.id,
            spoke,
        }
    }

    /// Drop any stream this cycle opened; the next cycle only starts after this event
    fn unwound(&self) -> Event {
        self.synthesizer.interrupt();
        tracing::debug!(cycle = %self.id, kind = ?self.kind, "Cycle unwound after cancellation");
        Event::CycleUnwound { cycle: self.id }
    }

    async fn request(&self, turns: &[Turn], with_tools: bool) -> LlmRequest {
        let system = {
            let tutorial = self.tutorial.read().await;
            build_system_prompt(&self.tool_type, &tutorial, self.kind)
        };
        let request = LlmRequest::new(system, prepare_for_request(turns, self.max_retained_images));
        if with_tools {
            request.with_tools(self.tools.definitions())
        } else {
            request
        }
    }

    /// Generate while feeding deltas to the client and the synthesizer
    async fn generate_speaking(
        &self,
        request: &LlmRequest,
        speech: &mut Speech,
    ) -> Result<Result<LlmResponse, LlmError>, Cancelled> {
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
        let generation = self.generator.generate(request, delta_tx);
        tokio::pin!(generation);

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(Cancelled),
                Some(delta) = delta_rx.recv() => {
                    self.on_delta(&delta, speech).await;
                }
                result = &mut generation => {
                    while let Ok(delta) = delta_rx.try_recv() {
                        self.on_delta(&delta, speech).await;
                    }
                    return Ok(result);
                }
            }
        }
    }

    /// Generate without streaming anything to the user
    async fn generate_silent(
        &self,
        request: &LlmRequest,
    ) -> Result<Result<LlmResponse, LlmError>, Cancelled> {
        let (delta_tx, _delta_rx) = mpsc::unbounded_channel();
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(Cancelled),
            result = self.generator.generate(request, delta_tx) => Ok(result),
        }
    }

    async fn on_delta(&self, delta: &str, speech: &mut Speech) {
        if self.token.is_cancelled() {
            return;
        }
        let _ = self.client.send(ClientEvent::AgentTextDelta {
            text: delta.to_string(),
        });
        for sentence in speech.streamer.push(delta) {
            speech.dispatch(self, &sentence).await;
        }
    }

    /// Run every requested tool in order and collect one result block per call
    async fn execute_tools(
        &self,
        tool_uses: Vec<ToolCall>,
    ) -> Result<Vec<ContentBlock>, Cancelled> {
        let mut results = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in tool_uses {
            if self.token.is_cancelled() {
                return Err(Cancelled);
            }
            let start = std::time::Instant::now();
            let output = tokio::select! {
                biased;
                () = self.token.cancelled() => return Err(Cancelled),
                output = self.tools.execute(&name, input, self.token.clone()) => output,
            };
            let output = output.unwrap_or_else(|| ToolOutput::error(format!("Unknown tool: {name}")));
            tracing::info!(
                cycle = %self.id,
                tool = %name,
                success = output.success,
                duration_ms = %start.elapsed().as_millis(),
                "Tool executed"
            );
            results.push(ContentBlock::tool_result(id, output.output, !output.success));
        }
        Ok(results)
    }
}

/// Synthesizer stream state for one cycle
struct Speech {
    streamer: SentenceStreamer,
    open: bool,
    /// At least one piece of text reached the synthesizer
    sent: bool,
}

impl Speech {
    async fn open<G, S, T>(runner: &CycleRunner<G, S, T>) -> Self
    where
        S: SpeechSynthesizer,
    {
        let open = match runner.synthesizer.open(runner.id).await {
            Ok(()) => true,
            Err(e) => {
                // The text still reaches the client; only audio is lost
                tracing::warn!(cycle = %runner.id, error = %e, "Could not open synthesizer stream");
                false
            }
        };
        Self {
            streamer: SentenceStreamer::new(),
            open,
            sent: false,
        }
    }

    /// Send one completed sentence, unless the cycle was interrupted
    async fn dispatch<G, S, T>(&mut self, runner: &CycleRunner<G, S, T>, sentence: &str)
    where
        S: SpeechSynthesizer,
    {
        if !self.open || runner.token.is_cancelled() {
            return;
        }
        match runner.synthesizer.send_chunk(sentence).await {
            Ok(()) => self.sent = true,
            Err(e) => tracing::debug!(cycle = %runner.id, error = %e, "Synthesizer rejected chunk"),
        }
    }

    async fn dispatch_remainder<G, S, T>(&mut self, runner: &CycleRunner<G, S, T>)
    where
        S: SpeechSynthesizer,
    {
        if let Some(rest) = self.streamer.take_remainder() {
            self.dispatch(runner, &rest).await;
        }
    }

    /// Flush the remainder and signal end of utterance; true if audio will follow
    async fn finish<G, S, T>(mut self, runner: &CycleRunner<G, S, T>) -> bool
    where
        S: SpeechSynthesizer,
    {
        if !self.open || runner.token.is_cancelled() {
            self.streamer.clear();
            return false;
        }
        if let Some(rest) = self.streamer.take_remainder() {
            match runner.synthesizer.send_text(&rest).await {
                Ok(()) => self.sent = true,
                Err(e) => tracing::debug!(cycle = %runner.id, error = %e, "Synthesizer rejected text"),
            }
        }
        if runner.token.is_cancelled() {
            return false;
        }
        if self.sent {
            if let Err(e) = runner.synthesizer.flush().await {
                tracing::debug!(cycle = %runner.id, error = %e, "Synthesizer flush failed");
            }
        }
        match runner.synthesizer.close_stream().await {
            Ok(()) => self.sent,
            Err(e) => {
                tracing::debug!(cycle = %runner.id, error = %e, "Synthesizer close failed");
                false
            }
        }
    }
}
