//! Mock implementations for testing
//!
//! These mocks enable end-to-end session tests without real I/O.

use super::traits::*;
use super::{ClientEvent, SessionChannels, SessionCommand, SessionRuntime};
use crate::config::SessionConfig;
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, LlmService, ToolDefinition, Usage};
use crate::speech::{SpeechError, SynthesisEvent, TranscriptEvent};
use crate::state_machine::{CycleId, SessionContext};
use crate::tools::ToolOutput;
use crate::tutorial::TutorialState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Generator
// ============================================================================

/// One scripted model reply
pub enum MockReply {
    /// Stream the deltas, then return the response
    Respond {
        deltas: Vec<String>,
        response: LlmResponse,
    },
    Fail(LlmError),
    /// Stream the deltas, then never finish
    Hang { deltas: Vec<String> },
}

/// Mock language model that plays queued replies in order
pub struct MockGenerator {
    replies: Mutex<VecDeque<MockReply>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
    /// Cancel this token once request N (1-based) has its reply ready
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(None),
        }
    }

    /// Cancel `token` right after request `request` produced its reply,
    /// as if the user spoke just as the model finished
    pub fn cancel_after(&self, request: usize, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some((request, token));
    }

    /// Queue a text reply streamed as the given deltas
    pub fn queue_text(&self, deltas: &[&str]) {
        let text: String = deltas.concat();
        self.replies.lock().unwrap().push_back(MockReply::Respond {
            deltas: deltas.iter().map(ToString::to_string).collect(),
            response: text_response(&text),
        });
    }

    /// Queue a reply requesting tools, given as `(id, name)`
    pub fn queue_tools(&self, text: &str, tools: &[(&str, &str)]) {
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        for (id, name) in tools {
            content.push(ContentBlock::tool_use(*id, *name, json!({})));
        }
        let deltas = if text.is_empty() { vec![] } else { vec![text.to_string()] };
        self.replies.lock().unwrap().push_back(MockReply::Respond {
            deltas,
            response: LlmResponse {
                content,
                end_turn: false,
                usage: Usage::default(),
            },
        });
    }

    pub fn queue_error(&self, error: LlmError) {
        self.replies.lock().unwrap().push_back(MockReply::Fail(error));
    }

    pub fn queue_hang(&self, deltas: &[&str]) {
        self.replies.lock().unwrap().push_back(MockReply::Hang {
            deltas: deltas.iter().map(ToString::to_string).collect(),
        });
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn text_response(text: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::text(text)],
        end_turn: true,
        usage: Usage::default(),
    }
}

#[async_trait]
impl LlmService for MockGenerator {
    async fn stream(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let number = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(MockReply::Respond {
                deltas: chunks,
                response,
            }) => {
                for chunk in chunks {
                    let _ = deltas.send(chunk);
                    tokio::task::yield_now().await;
                }
                if let Some((_, token)) = self
                    .cancel_after
                    .lock()
                    .unwrap()
                    .as_ref()
                    .filter(|(at, _)| *at == number)
                {
                    token.cancel();
                }
                Ok(response)
            }
            Some(MockReply::Fail(error)) => Err(error),
            Some(MockReply::Hang { deltas: chunks }) => {
                for chunk in chunks {
                    let _ = deltas.send(chunk);
                }
                std::future::pending().await
            }
            None => Err(LlmError::network("No mock response queued")),
        }
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

// ============================================================================
// Mock Synthesizer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthCall {
    Open(CycleId),
    Text(String),
    Chunk(String),
    Flush,
    Close,
    Interrupt,
}

/// Mock synthesizer: every text piece becomes one audio chunk immediately,
/// `close_stream` reports done.
///
/// On interrupt it still delivers one late chunk for the torn-down stream,
/// the way a provider frame already in flight would.
pub struct MockSynthesizer {
    events: mpsc::UnboundedSender<SynthesisEvent>,
    current: Mutex<Option<CycleId>>,
    /// `close_stream` leaves the stream playing and never reports done
    hold_done: bool,
    pub calls: Mutex<Vec<SynthCall>>,
}

impl MockSynthesizer {
    pub fn new(events: mpsc::UnboundedSender<SynthesisEvent>) -> Self {
        Self {
            events,
            current: Mutex::new(None),
            hold_done: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Audio keeps playing after the text is closed, like a real provider
    /// working through a long answer
    pub fn with_slow_playback(events: mpsc::UnboundedSender<SynthesisEvent>) -> Self {
        Self {
            hold_done: true,
            ..Self::new(events)
        }
    }

    pub fn recorded_calls(&self) -> Vec<SynthCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: SynthCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        let cycle = (*self.current.lock().unwrap()).ok_or(SpeechError::NotOpen)?;
        let _ = self.events.send(SynthesisEvent::Audio {
            cycle,
            audio: text.as_bytes().to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn open(&self, cycle: CycleId) -> Result<(), SpeechError> {
        self.record(SynthCall::Open(cycle));
        *self.current.lock().unwrap() = Some(cycle);
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), SpeechError> {
        self.speak(text)?;
        self.record(SynthCall::Text(text.to_string()));
        Ok(())
    }

    async fn send_chunk(&self, text: &str) -> Result<(), SpeechError> {
        self.speak(text)?;
        self.record(SynthCall::Chunk(text.to_string()));
        Ok(())
    }

    async fn flush(&self) -> Result<(), SpeechError> {
        self.record(SynthCall::Flush);
        Ok(())
    }

    async fn close_stream(&self) -> Result<(), SpeechError> {
        if self.hold_done {
            (*self.current.lock().unwrap()).ok_or(SpeechError::NotOpen)?;
            self.record(SynthCall::Close);
            return Ok(());
        }
        let cycle = self.current.lock().unwrap().take().ok_or(SpeechError::NotOpen)?;
        self.record(SynthCall::Close);
        let _ = self.events.send(SynthesisEvent::Done { cycle });
        Ok(())
    }

    fn interrupt(&self) {
        self.record(SynthCall::Interrupt);
        if let Some(cycle) = self.current.lock().unwrap().take() {
            let _ = self.events.send(SynthesisEvent::Audio {
                cycle,
                audio: b"late".to_vec(),
            });
        }
    }
}

// ============================================================================
// Mock Transcriber
// ============================================================================

#[derive(Default)]
pub struct MockTranscriber {
    pub audio: Mutex<Vec<Vec<u8>>>,
    pub closed: Mutex<bool>,
}

#[async_trait]
impl TranscriptSource for MockTranscriber {
    async fn connect(&self) -> Result<(), SpeechError> {
        Ok(())
    }

    async fn send_audio(&self, audio: Vec<u8>) -> Result<(), SpeechError> {
        self.audio.lock().unwrap().push(audio);
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

// ============================================================================
// Mock Tool Executor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolBehavior {
    Succeed,
    /// Never finishes
    Hang,
    /// Cancels the cycle it runs in, then succeeds
    CancelCycle,
}

/// Mock tool executor; known tools succeed with `{"ok": name}`
pub struct MockToolExecutor {
    definitions: Vec<ToolDefinition>,
    behaviors: Vec<(String, ToolBehavior)>,
    /// Record of tool executions
    pub executions: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self {
            definitions: Vec::new(),
            behaviors: Vec::new(),
            executions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tool(self, name: impl Into<String>) -> Self {
        self.with_behavior(name.into(), ToolBehavior::Succeed)
    }

    /// A tool that is still running when the cycle gets cancelled
    pub fn with_hanging_tool(self, name: impl Into<String>) -> Self {
        self.with_behavior(name.into(), ToolBehavior::Hang)
    }

    /// A tool that finishes just as the cycle gets cancelled
    pub fn with_cancelling_tool(self, name: impl Into<String>) -> Self {
        self.with_behavior(name.into(), ToolBehavior::CancelCycle)
    }

    fn with_behavior(mut self, name: String, behavior: ToolBehavior) -> Self {
        let description = format!("Mock {name}");
        self.definitions.push(ToolDefinition::new(
            name.clone(),
            description,
            json!({ "type": "object", "properties": {} }),
        ));
        self.behaviors.push((name, behavior));
        self
    }

    /// Names of executed tools, in order
    pub fn executed(&self) -> Vec<String> {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl Default for MockToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Option<ToolOutput> {
        let behavior = self
            .behaviors
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, behavior)| *behavior)?;
        self.executions
            .lock()
            .unwrap()
            .push((name.to_string(), input));
        match behavior {
            ToolBehavior::Succeed => {}
            ToolBehavior::Hang => std::future::pending::<()>().await,
            ToolBehavior::CancelCycle => cancel.cancel(),
        }
        Some(ToolOutput::json(json!({ "ok": name })))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

// ============================================================================
// Session harness
// ============================================================================

/// Idle checks far in the future
pub fn quiet_config() -> SessionConfig {
    SessionConfig::default()
}

/// Idle checks fire almost immediately
pub fn eager_config() -> SessionConfig {
    SessionConfig {
        idle_check_interval: Duration::from_millis(10),
        idle_threshold: Duration::from_millis(10),
        ..SessionConfig::default()
    }
}

const WAIT: Duration = Duration::from_secs(5);

/// A running session wired to mocks
pub struct TestSession {
    pub generator: Arc<MockGenerator>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub tools: Arc<MockToolExecutor>,
    pub transcriber: Arc<MockTranscriber>,
    pub commands: mpsc::Sender<SessionCommand>,
    transcripts: mpsc::UnboundedSender<TranscriptEvent>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    /// Every client event received so far
    pub log: Vec<ClientEvent>,
    handle: JoinHandle<()>,
}

impl TestSession {
    pub fn start(generator: MockGenerator, tools: MockToolExecutor, config: SessionConfig) -> Self {
        Self::launch(generator, tools, config, MockSynthesizer::new)
    }

    /// Like `start`, but synthesized audio is still playing when generation ends
    pub fn start_with_slow_playback(
        generator: MockGenerator,
        tools: MockToolExecutor,
        config: SessionConfig,
    ) -> Self {
        Self::launch(generator, tools, config, MockSynthesizer::with_slow_playback)
    }

    fn launch(
        generator: MockGenerator,
        tools: MockToolExecutor,
        config: SessionConfig,
        synthesizer: fn(mpsc::UnboundedSender<SynthesisEvent>) -> MockSynthesizer,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        let (synthesis_tx, synthesis_rx) = mpsc::unbounded_channel();
        let (client_tx, client_rx) = mpsc::unbounded_channel();

        let generator = Arc::new(generator);
        let synthesizer = Arc::new(synthesizer(synthesis_tx));
        let tools = Arc::new(tools);
        let transcriber = Arc::new(MockTranscriber::default());

        let runtime = SessionRuntime::new(
            SessionContext::new("test-session", "blender", config),
            LlmResponseGenerator::new(generator.clone()),
            synthesizer.clone(),
            tools.clone(),
            transcriber.clone(),
            Arc::new(RwLock::new(TutorialState::default())),
            CancellationToken::new(),
            SessionChannels {
                commands: command_rx,
                transcripts: transcript_rx,
                synthesis: synthesis_rx,
                client: client_tx,
            },
        );
        let handle = tokio::spawn(runtime.run());

        Self {
            generator,
            synthesizer,
            tools,
            transcriber,
            commands: command_tx,
            transcripts: transcript_tx,
            events: client_rx,
            log: Vec::new(),
            handle,
        }
    }

    /// The user finished an utterance
    pub fn say(&self, text: &str) {
        self.transcripts
            .send(TranscriptEvent::Committed(text.to_string()))
            .unwrap();
    }

    /// The user started speaking
    pub fn hear_partial(&self, text: &str) {
        self.transcripts
            .send(TranscriptEvent::Partial(text.to_string()))
            .unwrap();
    }

    /// The speech-to-text provider gave up
    pub fn fail_transcriber(&self, message: &str) {
        self.transcripts
            .send(TranscriptEvent::Failed(message.to_string()))
            .unwrap();
    }

    pub async fn send(&self, command: SessionCommand) {
        self.commands.send(command).await.unwrap();
    }

    /// Receive events until one matches
    pub async fn wait_for(&mut self, predicate: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let event = tokio::time::timeout_at(deadline, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out; events so far: {:#?}", self.log))
                .expect("session closed its event channel");
            self.log.push(event.clone());
            if predicate(&event) {
                return event;
            }
        }
    }

    pub async fn wait_for_state(&mut self, state: &str) {
        self.wait_for(|e| matches!(e, ClientEvent::StateChange { state: s } if s == state))
            .await;
    }

    /// Poll until the generator has seen `count` requests
    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(WAIT, async {
            while self.generator.request_count() < count {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("generator never received the request");
    }

    /// Poll until the synthesizer has recorded `call`
    pub async fn wait_for_synth_call(&self, call: SynthCall) {
        tokio::time::timeout(WAIT, async {
            while !self.synthesizer.recorded_calls().contains(&call) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("synthesizer never saw the call");
    }

    /// Collect whatever arrives within a short window
    pub async fn settle(&mut self) {
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), self.events.recv()).await
        {
            self.log.push(event);
        }
    }

    /// Stop the session and wait for the loop to exit
    pub async fn stop(mut self) -> Vec<ClientEvent> {
        let _ = self.commands.send(SessionCommand::Stop).await;
        tokio::time::timeout(WAIT, &mut self.handle)
            .await
            .expect("session did not stop")
            .unwrap();
        while let Ok(event) = self.events.try_recv() {
            self.log.push(event);
        }
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::is_well_formed;
    use crate::llm::{MessageRole, Turn};
    use crate::system_prompt::PROACTIVE_CHECK_PROMPT;

    fn texts(turn: &Turn) -> Vec<&str> {
        turn.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn tool_result_ids(turn: &Turn) -> Vec<(&str, bool)> {
        turn.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    ..
                } => Some((tool_use_id.as_str(), *is_error)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sentences_stream_to_synthesizer() {
        let generator = MockGenerator::new();
        generator.queue_text(&["Hello there. How ", "are you? Great."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), quiet_config());

        session.say("hi");
        session.wait_for_state("idle").await;

        assert_eq!(
            session.synthesizer.recorded_calls(),
            vec![
                SynthCall::Open(CycleId(1)),
                SynthCall::Chunk("Hello there. ".to_string()),
                SynthCall::Chunk("How are you? ".to_string()),
                SynthCall::Text("Great.".to_string()),
                SynthCall::Flush,
                SynthCall::Close,
            ]
        );
        let log = session.stop().await;
        assert!(log.contains(&ClientEvent::UserText { text: "hi".to_string() }));
        assert!(log.contains(&ClientEvent::AgentText {
            text: "Hello there. How are you? Great.".to_string()
        }));
        assert!(log
            .iter()
            .any(|e| matches!(e, ClientEvent::StateChange { state } if state == "speaking")));
    }

    #[tokio::test]
    async fn test_alternation_holds_for_every_request() {
        let generator = MockGenerator::new();
        generator.queue_tools("Let me look.", &[("t1", "inspect")]);
        generator.queue_text(&["Done."]);
        generator.queue_hang(&["Partial answer. "]);
        generator.queue_text(&["Okay."]);
        let tools = MockToolExecutor::new().with_tool("inspect");
        let mut session = TestSession::start(generator, tools, quiet_config());

        session.say("one");
        session.wait_for_state("idle").await;
        session.say("two");
        session.wait_for_state("speaking").await;
        session.hear_partial("wait");
        session.wait_for_state("idle").await;
        session.say("three");
        session.wait_for_state("idle").await;

        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 4);
        for request in &requests {
            assert!(is_well_formed(&request.messages), "{:#?}", request.messages);
            assert_eq!(request.messages.first().map(|t| t.role), Some(MessageRole::User));
        }
        // The interrupted cycle left no assistant turn; the user's words merged
        let last = requests[3].messages.last().unwrap();
        assert_eq!(texts(last), vec!["two", "three"]);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_no_audio_after_interrupt() {
        let generator = MockGenerator::new();
        generator.queue_hang(&["First sentence. "]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), quiet_config());

        session.say("explain layers");
        session
            .wait_for(|e| matches!(e, ClientEvent::AgentAudio { .. }))
            .await;
        session.hear_partial("actually");
        session.wait_for(|e| *e == ClientEvent::Interrupt).await;
        session.wait_for_state("idle").await;
        session.settle().await;

        let log = session.stop().await;
        let interrupt_at = log.iter().position(|e| *e == ClientEvent::Interrupt).unwrap();
        assert!(
            !log[interrupt_at..]
                .iter()
                .any(|e| matches!(e, ClientEvent::AgentAudio { .. })),
            "audio after interrupt: {log:#?}"
        );
    }

    #[tokio::test]
    async fn test_queued_utterance_runs_once_after_unwind() {
        let generator = MockGenerator::new();
        generator.queue_hang(&[]);
        generator.queue_text(&["Sure."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), quiet_config());

        session.say("first");
        session.wait_for_state("awaiting_response").await;
        session.wait_for_requests(1).await;
        session.say("second");
        session.wait_for_state("interrupted").await;
        session.wait_for_state("idle").await;
        session.settle().await;

        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 2);
        let all_text: Vec<&str> = requests[1].messages.iter().flat_map(texts).collect();
        assert_eq!(all_text, vec!["first", "second"]);

        let log = session.stop().await;
        let started: Vec<_> = log
            .iter()
            .filter(|e| matches!(e, ClientEvent::StateChange { state } if state == "awaiting_response"))
            .collect();
        assert_eq!(started.len(), 2);
    }

    #[tokio::test]
    async fn test_three_tool_calls_one_result_turn() {
        let generator = MockGenerator::new();
        generator.queue_tools(
            "Checking.",
            &[("a", "select"), ("b", "extrude"), ("c", "bevel")],
        );
        generator.queue_text(&["All set."]);
        let tools = MockToolExecutor::new()
            .with_tool("select")
            .with_tool("extrude")
            .with_tool("bevel");
        let mut session = TestSession::start(generator, tools, quiet_config());

        session.say("do it");
        session.wait_for_state("idle").await;

        assert_eq!(session.tools.executed(), vec!["select", "extrude", "bevel"]);
        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 2);
        let results = requests[1].messages.last().unwrap();
        assert_eq!(results.role, MessageRole::User);
        assert_eq!(
            tool_result_ids(results),
            vec![("a", false), ("b", false), ("c", false)]
        );

        let log = session.stop().await;
        assert!(log.contains(&ClientEvent::AgentTextContinue {
            text: "All set.".to_string()
        }));
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result() {
        let generator = MockGenerator::new();
        generator.queue_tools("", &[("x", "teleport")]);
        generator.queue_text(&["Sorry, I can't."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), quiet_config());

        session.say("teleport me");
        session.wait_for_state("idle").await;

        let requests = session.generator.recorded_requests();
        let results = requests[1].messages.last().unwrap();
        assert_eq!(tool_result_ids(results), vec![("x", true)]);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_generation_failure_keeps_session() {
        let generator = MockGenerator::new();
        generator.queue_error(LlmError::server_error("overloaded"));
        generator.queue_text(&["Back again."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), quiet_config());

        session.say("hello");
        session
            .wait_for(|e| matches!(e, ClientEvent::Error { .. }))
            .await;
        // Anything queued from the failed answer is purged before the error
        let interrupt_at = session.log.iter().position(|e| *e == ClientEvent::Interrupt);
        let error_at = session
            .log
            .iter()
            .position(|e| matches!(e, ClientEvent::Error { .. }));
        assert!(interrupt_at.is_some() && interrupt_at < error_at, "{:#?}", session.log);
        session.wait_for_state("idle").await;

        session.say("hello?");
        session.wait_for_state("idle").await;

        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(is_well_formed(&requests[1].messages));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_proactive_cancel_commits_nothing() {
        let generator = MockGenerator::new();
        generator.queue_hang(&[]);
        generator.queue_text(&["Hi."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), eager_config());

        session
            .send(SessionCommand::Frame {
                data: "aGVsbG8=".to_string(),
                media_type: "image/png".to_string(),
            })
            .await;
        session.wait_for_requests(1).await;
        session.say("hello");
        session.wait_for_state("idle").await;

        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].messages.last().unwrap().has_image());
        assert_eq!(requests[1].messages, vec![Turn::user_text("hello")]);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_proactive_silence_commits_nothing() {
        let generator = MockGenerator::new();
        generator.queue_text(&["[no comment]"]);
        generator.queue_text(&["Hi."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), eager_config());

        session
            .send(SessionCommand::Frame {
                data: "aGVsbG8=".to_string(),
                media_type: "image/png".to_string(),
            })
            .await;
        session.wait_for_requests(1).await;
        session.wait_for_state("idle").await;
        assert!(session.synthesizer.recorded_calls().is_empty());

        session.say("hello");
        session.wait_for(|e| matches!(e, ClientEvent::AgentText { .. })).await;
        session.wait_for_state("idle").await;

        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages, vec![Turn::user_text("hello")]);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_proactive_comment_committed_and_spoken() {
        let generator = MockGenerator::new();
        generator.queue_text(&["You could bevel that edge."]);
        generator.queue_text(&["Great."]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), eager_config());

        session
            .send(SessionCommand::Frame {
                data: "aGVsbG8=".to_string(),
                media_type: "image/png".to_string(),
            })
            .await;
        session
            .wait_for(|e| matches!(e, ClientEvent::AgentText { .. }))
            .await;
        session.wait_for_state("idle").await;
        assert_eq!(
            session.synthesizer.recorded_calls(),
            vec![
                SynthCall::Open(CycleId(1)),
                SynthCall::Text("You could bevel that edge.".to_string()),
                SynthCall::Flush,
                SynthCall::Close,
            ]
        );

        session.say("thanks");
        session.wait_for_state("idle").await;

        let requests = session.generator.recorded_requests();
        let messages = &requests[1].messages;
        assert_eq!(messages.len(), 3);
        assert!(messages[0].has_image());
        assert_eq!(texts(&messages[0]), vec![PROACTIVE_CHECK_PROMPT]);
        assert_eq!(messages[1].text(), "You could bevel that edge.");
        assert_eq!(messages[2], Turn::user_text("thanks"));
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_during_cycle_shuts_down() {
        let generator = MockGenerator::new();
        generator.queue_hang(&["A long answer. "]);
        let mut session = TestSession::start(generator, MockToolExecutor::new(), quiet_config());

        session.send(SessionCommand::AudioIn(vec![1, 2, 3])).await;
        session.say("tell me everything");
        session.wait_for_state("speaking").await;

        let transcriber = session.transcriber.clone();
        let log = session.stop().await;
        assert!(log.contains(&ClientEvent::Interrupt));
        assert!(*transcriber.closed.lock().unwrap());
        assert_eq!(*transcriber.audio.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test]
    async fn test_barge_in_while_answer_still_playing() {
        let generator = MockGenerator::new();
        generator.queue_text(&["First answer."]);
        generator.queue_text(&["Next answer."]);
        let mut session =
            TestSession::start_with_slow_playback(generator, MockToolExecutor::new(), quiet_config());

        session.say("first");
        session.wait_for_state("speaking").await;
        // Generation is over; only playback remains
        session.wait_for_synth_call(SynthCall::Close).await;
        session.settle().await;

        session.hear_partial("wa");
        session.wait_for(|e| *e == ClientEvent::Interrupt).await;
        session.wait_for_state("idle").await;
        session.say("wait, next");
        session.wait_for_requests(2).await;
        session.wait_for_state("speaking").await;

        assert!(!session
            .log
            .iter()
            .any(|e| matches!(e, ClientEvent::StateChange { state } if state == "interrupted")));
        let requests = session.generator.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.last(), Some(&Turn::user_text("wait, next")));
        assert!(is_well_formed(&requests[1].messages));

        // The second answer is also only playing now; stop must still end the session
        session.wait_for_synth_call(SynthCall::Open(CycleId(2))).await;
        session.settle().await;
        session.stop().await;
    }

    #[tokio::test]
    async fn test_commit_while_answer_still_playing_starts_next_cycle() {
        let generator = MockGenerator::new();
        generator.queue_text(&["Long explanation."]);
        generator.queue_text(&["Short one."]);
        let mut session =
            TestSession::start_with_slow_playback(generator, MockToolExecutor::new(), quiet_config());

        session.say("explain");
        session.wait_for_state("speaking").await;
        session.wait_for_synth_call(SynthCall::Close).await;
        session.settle().await;

        // A commit with no partial before it
        session.say("shorter please");
        session.wait_for_requests(2).await;
        session.settle().await;

        let log = session.stop().await;
        assert!(log.contains(&ClientEvent::Interrupt));
        assert!(log.contains(&ClientEvent::UserText {
            text: "shorter please".to_string()
        }));
    }

    #[tokio::test]
    async fn test_transcriber_failure_reported_to_client() {
        let mut session = TestSession::start(MockGenerator::new(), MockToolExecutor::new(), quiet_config());

        session.fail_transcriber("Speech recognition is unavailable.");
        let event = session
            .wait_for(|e| matches!(e, ClientEvent::Error { .. }))
            .await;
        assert_eq!(
            event,
            ClientEvent::Error {
                message: "Speech recognition is unavailable.".to_string()
            }
        );

        // The session itself keeps running until the client stops it
        session.send(SessionCommand::PlaybackEnded).await;
        session.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_client_ends_session() {
        let session = TestSession::start(MockGenerator::new(), MockToolExecutor::new(), quiet_config());
        let TestSession {
            commands,
            handle,
            transcriber,
            ..
        } = session;
        drop(commands);
        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(*transcriber.closed.lock().unwrap());
    }
}
