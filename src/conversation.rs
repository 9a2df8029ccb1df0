//! Conversation history and outbound request preparation
//!
//! History is append-only during a session. Before every generation call the
//! turns are copied, repaired so they satisfy the provider's alternation and
//! tool-pairing rules, and stripped of all but the most recent images.

mod history;
mod prune;
mod sanitize;

#[cfg(test)]
mod proptests;

pub use history::ConversationHistory;
pub use prune::{prune_images, IMAGE_OMITTED_PLACEHOLDER};
pub use sanitize::{sanitize, INTERRUPTED_PLACEHOLDER};

use crate::llm::{ContentBlock, MessageRole, Turn};
use std::collections::HashSet;

/// Produce the turn list sent with a generation request
pub fn prepare_for_request(turns: &[Turn], max_retained_images: usize) -> Vec<Turn> {
    let mut prepared = sanitize(turns);
    prune_images(&mut prepared, max_retained_images);
    prepared
}

/// Whether `turns` satisfies the alternation and tool-pairing invariant.
///
/// Roles strictly alternate, no turn is empty, and every assistant turn with
/// tool-use blocks is immediately followed by a user turn holding exactly the
/// matching tool-results (and vice versa).
pub fn is_well_formed(turns: &[Turn]) -> bool {
    for (i, turn) in turns.iter().enumerate() {
        if turn.content.is_empty() {
            return false;
        }
        let prev = i.checked_sub(1).and_then(|p| turns.get(p));
        if prev.is_some_and(|p| p.role == turn.role) {
            return false;
        }

        match turn.role {
            MessageRole::Assistant => {
                if turn.has_tool_result() {
                    return false;
                }
                let uses = tool_use_ids(turn);
                if !uses.is_empty() {
                    match turns.get(i + 1) {
                        Some(next) if tool_result_ids(next) == uses => {}
                        _ => return false,
                    }
                }
            }
            MessageRole::User => {
                if turn.has_tool_use() {
                    return false;
                }
                let results = tool_result_ids(turn);
                if !results.is_empty() && prev.map(tool_use_ids) != Some(results) {
                    return false;
                }
            }
        }
    }
    true
}

pub(crate) fn tool_use_ids(turn: &Turn) -> HashSet<&str> {
    turn.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        })
        .collect()
}

pub(crate) fn tool_result_ids(turn: &Turn) -> HashSet<&str> {
    turn.content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect()
}
