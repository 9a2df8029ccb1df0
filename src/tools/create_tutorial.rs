//! Create tutorial tool - starts background tutorial generation
//!
//! Returns immediately so the agent can keep talking; the client learns the
//! outcome through `tutorial_ready` or `tutorial_error`.

use super::{Tool, ToolContext, ToolOutput};
use crate::runtime::ClientEvent;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub struct CreateTutorialTool;

#[derive(Debug, Deserialize)]
struct CreateTutorialInput {
    topic: String,
    #[serde(default)]
    context: Option<String>,
}

#[async_trait]
impl Tool for CreateTutorialTool {
    fn name(&self) -> &'static str {
        "create_tutorial"
    }

    fn description(&self) -> String {
        "Generate a step-by-step tutorial for something the user wants to learn in their application. Generation runs in the background and the tutorial appears on the user's screen when ready; keep talking to the user meanwhile. Only one tutorial can be generated at a time.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["topic"],
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "What the tutorial should teach, e.g. 'add a drop shadow to a layer'"
                },
                "context": {
                    "type": "string",
                    "description": "Relevant details about the user's goal or current setup"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        let input = match serde_json::from_value::<CreateTutorialInput>(input) {
            Ok(input) => input,
            Err(e) => return ToolOutput::error(format!("Invalid input: {e}")),
        };
        let topic = input.topic.trim().to_string();
        if topic.is_empty() {
            return ToolOutput::error("topic must not be empty");
        }

        if let Err(e) = ctx.tutorial().write().await.begin_generation(&topic) {
            return ToolOutput::error(e.to_string());
        }
        ctx.notify(ClientEvent::TutorialLoading {
            topic: topic.clone(),
        });

        // Generation outlives the cycle but not the session
        let tutorial = ctx.tutorial().clone();
        let generator = ctx.generator().clone();
        let events = ctx.events().clone();
        let session_cancel = ctx.session_cancel().clone();
        let tool_type = ctx.tool_type.clone();
        let session_id = ctx.session_id.clone();
        let spawned_topic = topic.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = session_cancel.cancelled() => None,
                result = generator.generate(&spawned_topic, input.context.as_deref(), &tool_type) => Some(result),
            };

            let mut state = tutorial.write().await;
            match outcome {
                None => state.finish_generation(None),
                Some(Ok(generated)) => {
                    tracing::info!(
                        session_id = %session_id,
                        topic = %spawned_topic,
                        steps = generated.steps.len(),
                        "Tutorial ready"
                    );
                    state.finish_generation(Some(generated.clone()));
                    drop(state);
                    let _ = events.send(ClientEvent::TutorialReady {
                        tutorial: generated,
                    });
                }
                Some(Err(e)) => {
                    tracing::warn!(session_id = %session_id, topic = %spawned_topic, error = %e, "Tutorial generation failed");
                    state.finish_generation(None);
                    drop(state);
                    let _ = events.send(ClientEvent::TutorialError {
                        message: e.to_string(),
                    });
                }
            }
        });

        ToolOutput::json(json!({ "status": "generating", "topic": topic }))
    }
}
