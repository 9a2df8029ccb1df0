//! Tutorial content, step pointer and generation
//!
//! A tutorial is a titled list of steps for the desktop tool the user is
//! working in. Tool handlers mutate the shared [`TutorialState`]; the prompt
//! builder reads it.

use crate::llm::{LlmRequest, LlmResponse, LlmService, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_STEPS: usize = 20;

const GENERATION_PROMPT: &str = r#"You write short, practical tutorials for desktop software. Given a topic, produce a tutorial the user can follow one step at a time while a voice tutor guides them.

Respond with JSON only, no prose and no code fences, in exactly this shape:
{"title": "...", "steps": [{"title": "...", "instruction": "..."}]}

Rules:
- Between 3 and 12 steps.
- Each instruction is one or two sentences, naming concrete menus, panels and shortcuts.
- Use the terminology of the named application."#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorialStep {
    pub title: String,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tutorial {
    pub title: String,
    pub steps: Vec<TutorialStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TutorialError {
    #[error("No tutorial is active")]
    NoTutorial,
    #[error("A tutorial about {0:?} is already being generated")]
    AlreadyGenerating(String),
    #[error("Step {step} does not exist (tutorial has {total} steps)")]
    StepOutOfRange { step: usize, total: usize },
    #[error("Already at the last step")]
    AtLastStep,
    #[error("Already at the first step")]
    AtFirstStep,
    #[error("Tutorial generation failed: {0}")]
    Generation(String),
}

/// How to move the step pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Next,
    Previous,
    Restart,
    /// 1-based step number
    Goto(usize),
}

/// Session-scoped tutorial state
#[derive(Debug, Default)]
pub struct TutorialState {
    tutorial: Option<Tutorial>,
    current_step: usize,
    /// Topic of the generation in flight, if any
    generating: Option<String>,
}

pub type SharedTutorial = Arc<RwLock<TutorialState>>;

impl TutorialState {
    pub fn tutorial(&self) -> Option<&Tutorial> {
        self.tutorial.as_ref()
    }

    /// Current step as `(0-based index, step)`
    pub fn current(&self) -> Option<(usize, &TutorialStep)> {
        let tutorial = self.tutorial.as_ref()?;
        tutorial
            .steps
            .get(self.current_step)
            .map(|step| (self.current_step, step))
    }

    pub fn generating(&self) -> Option<&str> {
        self.generating.as_deref()
    }

    /// Mark a generation as started; only one may run at a time
    pub fn begin_generation(&mut self, topic: &str) -> Result<(), TutorialError> {
        if let Some(existing) = &self.generating {
            return Err(TutorialError::AlreadyGenerating(existing.clone()));
        }
        self.generating = Some(topic.to_string());
        Ok(())
    }

    /// Finish a generation, installing the tutorial on success
    pub fn finish_generation(&mut self, tutorial: Option<Tutorial>) {
        self.generating = None;
        if let Some(tutorial) = tutorial {
            self.tutorial = Some(tutorial);
            self.current_step = 0;
        }
    }

    /// Move the step pointer, returning the new 0-based index
    pub fn advance(&mut self, action: StepAction) -> Result<usize, TutorialError> {
        let total = self
            .tutorial
            .as_ref()
            .map(|t| t.steps.len())
            .ok_or(TutorialError::NoTutorial)?;

        let next = match action {
            StepAction::Next => {
                if self.current_step + 1 >= total {
                    return Err(TutorialError::AtLastStep);
                }
                self.current_step + 1
            }
            StepAction::Previous => {
                if self.current_step == 0 {
                    return Err(TutorialError::AtFirstStep);
                }
                self.current_step - 1
            }
            StepAction::Restart => 0,
            StepAction::Goto(step) => {
                if step == 0 || step > total {
                    return Err(TutorialError::StepOutOfRange { step, total });
                }
                step - 1
            }
        };
        self.current_step = next;
        Ok(next)
    }
}

/// Produces tutorial content for a topic
#[async_trait]
pub trait TutorialGenerator: Send + Sync {
    async fn generate(
        &self,
        topic: &str,
        context: Option<&str>,
        tool_type: &str,
    ) -> Result<Tutorial, TutorialError>;
}

/// Single-call LLM generator returning JSON
pub struct LlmTutorialGenerator {
    llm: Arc<dyn LlmService>,
}

impl LlmTutorialGenerator {
    pub fn new(llm: Arc<dyn LlmService>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl TutorialGenerator for LlmTutorialGenerator {
    async fn generate(
        &self,
        topic: &str,
        context: Option<&str>,
        tool_type: &str,
    ) -> Result<Tutorial, TutorialError> {
        let mut prompt = format!("Application: {tool_type}\nTopic: {topic}");
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("\nWhat the user has said so far: ");
            prompt.push_str(context);
        }

        let request = LlmRequest::new(GENERATION_PROMPT, vec![Turn::user_text(prompt)]).with_max_tokens(4096);

        let response = match timeout(GENERATION_TIMEOUT, self.llm.complete(&request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TutorialError::Generation(e.message)),
            Err(_) => return Err(TutorialError::Generation("timed out".to_string())),
        };
        parse_tutorial(&response)
    }
}

/// Extract the tutorial JSON from a model response
fn parse_tutorial(response: &LlmResponse) -> Result<Tutorial, TutorialError> {
    let text = response.text();
    let json = text
        .find('{')
        .zip(text.rfind('}'))
        .and_then(|(start, end)| text.get(start..=end))
        .ok_or_else(|| TutorialError::Generation("response contained no JSON".to_string()))?;

    let mut tutorial: Tutorial = serde_json::from_str(json)
        .map_err(|e| TutorialError::Generation(format!("malformed tutorial: {e}")))?;

    tutorial
        .steps
        .retain(|s| !s.title.trim().is_empty() || !s.instruction.trim().is_empty());
    tutorial.steps.truncate(MAX_STEPS);
    if tutorial.steps.is_empty() {
        return Err(TutorialError::Generation("tutorial has no steps".to_string()));
    }
    Ok(tutorial)
}
