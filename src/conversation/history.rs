//! In-memory conversation history for one session

use crate::llm::{ContentBlock, MessageRole, Turn};

/// Ordered turns of one session. Owned by the session loop only.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append user content, merging into the last turn if it is already a user turn.
    ///
    /// That happens when an interrupted cycle never produced an assistant turn.
    pub fn push_user(&mut self, content: Vec<ContentBlock>) {
        if content.is_empty() {
            return;
        }
        match self.turns.last_mut() {
            Some(last) if last.role == MessageRole::User => last.content.extend(content),
            _ => self.turns.push(Turn::user(content)),
        }
    }

    pub fn push(&mut self, turn: Turn) {
        if turn.role == MessageRole::User {
            self.push_user(turn.content);
        } else if !turn.content.is_empty() {
            self.turns.push(turn);
        }
    }

    /// Append a batch of turns in one step
    pub fn commit(&mut self, turns: Vec<Turn>) {
        for turn in turns {
            self.push(turn);
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
