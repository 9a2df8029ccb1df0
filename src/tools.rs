//! Tools the tutor agent can invoke
//!
//! Tools are stateless singletons; everything a call needs arrives through
//! [`ToolContext`]. Side effects on the client go out as session events.

mod advance_step;
mod create_tutorial;
mod show_hotkey;

pub use advance_step::AdvanceStepTool;
pub use create_tutorial::CreateTutorialTool;
pub use show_hotkey::ShowHotkeyTool;

use crate::runtime::ClientEvent;
use crate::tutorial::{SharedTutorial, TutorialGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Successful result carrying a serialized object
    #[allow(clippy::needless_pass_by_value)] // callers build the value inline
    pub fn json(value: Value) -> Self {
        Self::success(value.to_string())
    }

    /// Error-shaped result: `{"error": message}`
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: json!({ "error": message.into() }).to_string(),
        }
    }
}

/// All context needed for a tool invocation.
///
/// Created fresh for each tool call. Tools should be stateless and derive
/// all context from this struct.
#[derive(Clone)]
pub struct ToolContext {
    /// Cancellation signal of the cycle that issued the call
    pub cancel: CancellationToken,

    /// The session this tool is executing within
    pub session_id: String,

    /// Desktop application the session is about
    pub tool_type: String,

    /// Cancelled when the session ends; bounds background work
    session_cancel: CancellationToken,

    events: mpsc::UnboundedSender<ClientEvent>,
    tutorial: SharedTutorial,
    generator: Arc<dyn TutorialGenerator>,
}

impl ToolContext {
    pub fn new(
        cancel: CancellationToken,
        session: &SessionTools,
    ) -> Self {
        Self {
            cancel,
            session_id: session.session_id.clone(),
            tool_type: session.tool_type.clone(),
            session_cancel: session.session_cancel.clone(),
            events: session.events.clone(),
            tutorial: session.tutorial.clone(),
            generator: session.generator.clone(),
        }
    }

    /// Send an event to the client; dropped if the session is gone
    pub fn notify(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub fn events(&self) -> &mpsc::UnboundedSender<ClientEvent> {
        &self.events
    }

    pub fn tutorial(&self) -> &SharedTutorial {
        &self.tutorial
    }

    pub fn generator(&self) -> &Arc<dyn TutorialGenerator> {
        &self.generator
    }

    pub fn session_cancel(&self) -> &CancellationToken {
        &self.session_cancel
    }
}

/// Session-scoped pieces every tool call shares
#[derive(Clone)]
pub struct SessionTools {
    pub session_id: String,
    pub tool_type: String,
    pub session_cancel: CancellationToken,
    pub events: mpsc::UnboundedSender<ClientEvent>,
    pub tutorial: SharedTutorial,
    pub generator: Arc<dyn TutorialGenerator>,
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name
    fn name(&self) -> &str;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool with all context provided via `ToolContext`
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

/// Collection of tools available to sessions
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create the standard tutor tool set
    pub fn standard() -> Self {
        Self {
            tools: vec![
                Arc::new(CreateTutorialTool),
                Arc::new(AdvanceStepTool),
                Arc::new(ShowHotkeyTool),
            ],
        }
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<crate::llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| crate::llm::ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect()
    }

    /// Execute a tool by name with context
    pub async fn execute(&self, name: &str, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        for tool in &self.tools {
            if tool.name() == name {
                return Some(tool.run(input, ctx).await);
            }
        }
        None
    }
}
