//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the session loop with mock implementations.

use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService};
use crate::speech::SpeechError;
use crate::state_machine::CycleId;
use crate::tools::{SessionTools, ToolContext, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Streaming language model
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a response, sending text deltas as they arrive.
    ///
    /// Aborted by dropping the returned future.
    async fn generate(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError>;

    /// Get the model ID
    #[allow(dead_code)] // API completeness
    fn model_id(&self) -> &str;
}

/// Streaming text-to-speech.
///
/// Audio and completion are reported on the channel the implementation was
/// constructed with, tagged with the cycle passed to `open`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Open a fresh stream for `cycle`, tearing down any previous one
    async fn open(&self, cycle: CycleId) -> Result<(), SpeechError>;

    /// Send text to be spoken
    async fn send_text(&self, text: &str) -> Result<(), SpeechError>;

    /// Send a complete sentence and ask the provider to start synthesizing
    async fn send_chunk(&self, text: &str) -> Result<(), SpeechError>;

    /// Force synthesis of everything buffered so far
    async fn flush(&self) -> Result<(), SpeechError>;

    /// Signal end of input; remaining audio still arrives
    async fn close_stream(&self) -> Result<(), SpeechError>;

    /// Drop the current stream immediately. No further audio is reported for it.
    fn interrupt(&self);
}

/// Streaming speech-to-text.
///
/// Transcript events are reported on the channel the implementation was
/// constructed with.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn connect(&self) -> Result<(), SpeechError>;

    async fn send_audio(&self, audio: Vec<u8>) -> Result<(), SpeechError>;

    async fn close(&self);
}

/// Executor for tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a tool by name with cancellation support
    async fn execute(
        &self,
        name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Option<ToolOutput>;

    /// Get tool definitions for LLM
    fn definitions(&self) -> Vec<crate::llm::ToolDefinition>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: ResponseGenerator + ?Sized> ResponseGenerator for Arc<T> {
    async fn generate(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        (**self).generate(request, deltas).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

#[async_trait]
impl<T: SpeechSynthesizer + ?Sized> SpeechSynthesizer for Arc<T> {
    async fn open(&self, cycle: CycleId) -> Result<(), SpeechError> {
        (**self).open(cycle).await
    }

    async fn send_text(&self, text: &str) -> Result<(), SpeechError> {
        (**self).send_text(text).await
    }

    async fn send_chunk(&self, text: &str) -> Result<(), SpeechError> {
        (**self).send_chunk(text).await
    }

    async fn flush(&self) -> Result<(), SpeechError> {
        (**self).flush().await
    }

    async fn close_stream(&self) -> Result<(), SpeechError> {
        (**self).close_stream().await
    }

    fn interrupt(&self) {
        (**self).interrupt();
    }
}

#[async_trait]
impl<T: TranscriptSource + ?Sized> TranscriptSource for Arc<T> {
    async fn connect(&self) -> Result<(), SpeechError> {
        (**self).connect().await
    }

    async fn send_audio(&self, audio: Vec<u8>) -> Result<(), SpeechError> {
        (**self).send_audio(audio).await
    }

    async fn close(&self) {
        (**self).close().await;
    }
}

#[async_trait]
impl<T: ToolExecutor + ?Sized> ToolExecutor for Arc<T> {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Option<ToolOutput> {
        (**self).execute(name, input, cancel).await
    }

    fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        (**self).definitions()
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use an `LlmService` as `ResponseGenerator`
pub struct LlmResponseGenerator {
    llm: Arc<dyn LlmService>,
}

impl LlmResponseGenerator {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ResponseGenerator for LlmResponseGenerator {
    async fn generate(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        self.llm.stream(request, deltas).await
    }

    fn model_id(&self) -> &str {
        self.llm.model_id()
    }
}

/// Adapter to use `ToolRegistry` as `ToolExecutor`
pub struct ToolRegistryExecutor {
    registry: ToolRegistry,
    session: SessionTools,
}

impl ToolRegistryExecutor {
    pub fn new(registry: ToolRegistry, session: SessionTools) -> Self {
        Self { registry, session }
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistryExecutor {
    async fn execute(
        &self,
        name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Option<ToolOutput> {
        let ctx = ToolContext::new(cancel, &self.session);
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.registry.definitions()
    }
}
