//! Provider-neutral request, turn and response types
//!
//! The session history is a list of [`Turn`]s. Screen frames enter it as
//! image blocks on user turns; tool calls and their results pair up across
//! an assistant turn and the user turn that follows it.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Base64 image, usually a screen frame
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ContentBlock::Image {
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Text blocks joined without separators; deltas were split mid-word
fn joined_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn tool_uses_in(blocks: &[ContentBlock]) -> Vec<(&str, &str, &Value)> {
    blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
        .collect()
}

/// One role-tagged unit of conversation history
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentBlock::text(text)])
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    /// Tool-use blocks as `(id, name, input)`, in order
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        tool_uses_in(&self.content)
    }

    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }

    pub fn has_tool_result(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolResult { .. }))
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::Image { .. }))
    }

    pub fn text(&self) -> String {
        joined_text(&self.content)
    }
}

/// System prompt segment; `cache` marks a prompt-cache breakpoint
#[derive(Debug, Clone)]
pub struct SystemContent {
    pub text: String,
    pub cache: bool,
}

impl SystemContent {
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: true,
        }
    }
}

/// Tool advertised to the model
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: Vec<SystemContent>,
    pub messages: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
    /// Overrides the configured limit
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Request with a single cached system prompt and no tools
    pub fn new(system: impl Into<String>, messages: Vec<Turn>) -> Self {
        Self {
            system: vec![SystemContent::cached(system)],
            messages,
            tools: Vec::new(),
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

/// Assembled result of one streamed request
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    /// False when the model stopped to call tools or hit the token limit
    pub end_turn: bool,
    pub usage: Usage,
}

impl LlmResponse {
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        tool_uses_in(&self.content)
    }

    pub fn text(&self) -> String {
        joined_text(&self.content)
    }

    /// The assistant turn this response adds to the history
    pub fn into_turn(self) -> Turn {
        Turn::assistant(self.content)
    }
}
