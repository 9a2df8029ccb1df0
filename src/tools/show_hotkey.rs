//! Show hotkey tool - displays a keyboard shortcut on the client

use super::{Tool, ToolContext, ToolOutput};
use crate::runtime::ClientEvent;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ShowHotkeyTool;

#[derive(Debug, Deserialize)]
struct ShowHotkeyInput {
    keys: Vec<String>,
    action: String,
}

#[async_trait]
impl Tool for ShowHotkeyTool {
    fn name(&self) -> &'static str {
        "show_hotkey"
    }

    fn description(&self) -> String {
        "Display a keyboard shortcut on the user's screen while you mention it, so they can see exactly which keys to press.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["keys", "action"],
            "properties": {
                "keys": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "description": "Keys pressed together, e.g. [\"Ctrl\", \"Shift\", \"N\"]"
                },
                "action": {
                    "type": "string",
                    "description": "What the shortcut does"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input = match serde_json::from_value::<ShowHotkeyInput>(input) {
            Ok(input) => input,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let keys: Vec<String> = input.keys.iter().map(|k| k.trim().to_string()).collect();
        if keys.is_empty() || keys.iter().any(String::is_empty) {
            return ToolOutput::error("keys must be a non-empty list of key names");
        }
        let action = input.action.trim().to_string();
        if action.is_empty() {
            return ToolOutput::error("action must not be empty");
        }

        ctx.notify(ClientEvent::HotkeyDisplay { keys, action });
        ToolOutput::json(json!({ "displayed": true }))
    }
}
