//! Repair of interrupted tool rounds and role alternation

use super::{tool_result_ids, tool_use_ids};
use crate::llm::{ContentBlock, MessageRole, Turn};

/// Stands in for tool calls that never received results
pub const INTERRUPTED_PLACEHOLDER: &str = "[interrupted]";

/// Return a copy of `turns` that satisfies [`super::is_well_formed`].
///
/// - Assistant tool-use blocks without matching results in the very next turn
///   are dropped; if the turn had no text of its own it gets the placeholder.
/// - Tool-result blocks with no matching tool-use right before them become text.
/// - Adjacent same-role turns are merged and empty blocks/turns removed.
pub fn sanitize(turns: &[Turn]) -> Vec<Turn> {
    let mut turns: Vec<Turn> = turns
        .iter()
        .filter_map(|turn| {
            let content: Vec<ContentBlock> = turn
                .content
                .iter()
                .filter(|block| !matches!(block, ContentBlock::Text { text } if text.is_empty()))
                .cloned()
                .collect();
            (!content.is_empty()).then_some(Turn {
                role: turn.role,
                content,
            })
        })
        .collect();

    repair_tool_uses(&mut turns);
    repair_tool_results(&mut turns);

    let mut merged = merge_same_role(turns);
    for turn in &mut merged {
        if turn.role == MessageRole::User {
            // Results lead the user turn they share with other content
            turn.content
                .sort_by_key(|block| !matches!(block, ContentBlock::ToolResult { .. }));
        }
    }
    merged
}

fn repair_tool_uses(turns: &mut [Turn]) {
    for i in (0..turns.len()).rev() {
        let orphaned = {
            let turn = &turns[i];
            match turn.role {
                MessageRole::User => turn.has_tool_use(),
                MessageRole::Assistant => {
                    let uses = tool_use_ids(turn);
                    !uses.is_empty()
                        && !turns.get(i + 1).is_some_and(|next| {
                            next.role == MessageRole::User
                                && uses.is_subset(&tool_result_ids(next))
                        })
                }
            }
        };
        if !orphaned {
            continue;
        }

        let turn = &mut turns[i];
        tracing::debug!(turn = i, "Replacing orphaned tool-use blocks");
        turn.content
            .retain(|block| !matches!(block, ContentBlock::ToolUse { .. }));
        let has_text = turn
            .content
            .iter()
            .any(|block| matches!(block, ContentBlock::Text { .. }));
        if !has_text {
            turn.content.push(ContentBlock::text(INTERRUPTED_PLACEHOLDER));
        }
    }
}

fn repair_tool_results(turns: &mut [Turn]) {
    for i in 0..turns.len() {
        let allowed: Vec<String> = match (turns[i].role, i.checked_sub(1)) {
            (MessageRole::User, Some(prev)) if turns[prev].role == MessageRole::Assistant => {
                tool_use_ids(&turns[prev]).into_iter().map(str::to_string).collect()
            }
            _ => Vec::new(),
        };

        for block in &mut turns[i].content {
            if let ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                if !allowed.iter().any(|id| id == tool_use_id) {
                    tracing::debug!(tool_use_id = %tool_use_id, "Converting orphaned tool result to text");
                    *block = ContentBlock::text(format!("Tool result: {content}"));
                }
            }
        }
    }
}

fn merge_same_role(turns: Vec<Turn>) -> Vec<Turn> {
    let mut merged: Vec<Turn> = Vec::with_capacity(turns.len());
    for turn in turns {
        match merged.last_mut() {
            Some(last) if last.role == turn.role => last.content.extend(turn.content),
            _ => merged.push(turn),
        }
    }
    merged
}
