//! Advance step tool - moves the tutorial step pointer

use super::{Tool, ToolContext, ToolOutput};
use crate::runtime::ClientEvent;
use crate::tutorial::StepAction;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct AdvanceStepTool;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Next,
    Previous,
    Restart,
    Goto,
}

#[derive(Debug, Deserialize)]
struct AdvanceStepInput {
    action: Action,
    #[serde(default)]
    step: Option<usize>,
}

impl AdvanceStepInput {
    fn into_action(self) -> Result<StepAction, String> {
        match (self.action, self.step) {
            (Action::Next, _) => Ok(StepAction::Next),
            (Action::Previous, _) => Ok(StepAction::Previous),
            (Action::Restart, _) => Ok(StepAction::Restart),
            (Action::Goto, Some(step)) => Ok(StepAction::Goto(step)),
            (Action::Goto, None) => Err("goto requires a step number".to_string()),
        }
    }
}

#[async_trait]
impl Tool for AdvanceStepTool {
    fn name(&self) -> &'static str {
        "advance_step"
    }

    fn description(&self) -> String {
        "Move through the active tutorial when the user finishes a step, wants to go back, or asks to start over. Use goto with a 1-based step number to jump.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["next", "previous", "restart", "goto"]
                },
                "step": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Step number for goto (1-based)"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let action = match serde_json::from_value::<AdvanceStepInput>(input)
            .map_err(|e| format!("Invalid input: {e}"))
            .and_then(AdvanceStepInput::into_action)
        {
            Ok(action) => action,
            Err(e) => return ToolOutput::error(e),
        };

        let mut state = ctx.tutorial().write().await;
        if let Err(e) = state.advance(action) {
            return ToolOutput::error(e.to_string());
        }
        let total_steps = state.tutorial().map_or(0, |t| t.steps.len());
        let Some((index, step)) = state.current().map(|(i, s)| (i, s.clone())) else {
            return ToolOutput::error("No tutorial is active");
        };
        drop(state);

        ctx.notify(ClientEvent::StepUpdate {
            step_number: index + 1,
            total_steps,
            step: step.clone(),
        });
        ToolOutput::json(json!({
            "step_number": index + 1,
            "total_steps": total_steps,
            "title": step.title,
            "instruction": step.instruction,
        }))
    }
}
