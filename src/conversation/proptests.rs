//! Property-based tests for request preparation
//!
//! Any history the session can build, including ones left behind by
//! interruptions at arbitrary points, must come out well formed.

use super::*;
use crate::llm::{ContentBlock, MessageRole, Turn};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_id() -> impl Strategy<Value = String> {
    "[a-d]".prop_map(|s| format!("tool_{s}"))
}

fn arb_user_block() -> impl Strategy<Value = ContentBlock> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(ContentBlock::text),
        "[A-Z]{4}".prop_map(|data| ContentBlock::image("image/jpeg", data)),
        (arb_id(), "[a-z]{0,8}", any::<bool>())
            .prop_map(|(id, content, is_error)| ContentBlock::tool_result(id, content, is_error)),
    ]
}

fn arb_assistant_block() -> impl Strategy<Value = ContentBlock> {
    prop_oneof![
        "[a-z .]{0,16}".prop_map(ContentBlock::text),
        arb_id().prop_map(|id| ContentBlock::tool_use(id, "advance_step", json!({"action": "next"}))),
    ]
}

fn arb_turn() -> impl Strategy<Value = Turn> {
    prop_oneof![
        proptest::collection::vec(arb_user_block(), 0..4).prop_map(Turn::user),
        proptest::collection::vec(arb_assistant_block(), 0..4).prop_map(Turn::assistant),
    ]
}

fn arb_history() -> impl Strategy<Value = Vec<Turn>> {
    proptest::collection::vec(arb_turn(), 0..12)
}

fn image_turn_count(turns: &[Turn]) -> usize {
    turns.iter().filter(|t| t.has_image()).count()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_prepared_history_is_well_formed(turns in arb_history(), keep in 0usize..4) {
        let prepared = prepare_for_request(&turns, keep);
        prop_assert!(is_well_formed(&prepared), "not well formed: {:#?}", prepared);
    }

    #[test]
    fn prop_sanitize_is_idempotent(turns in arb_history()) {
        let once = sanitize(&turns);
        let twice = sanitize(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_sanitize_never_loses_user_text(turns in arb_history()) {
        let expected: Vec<String> = turns
            .iter()
            .filter(|t| t.role == MessageRole::User)
            .flat_map(|t| t.content.iter())
            .filter_map(|b| match b {
                ContentBlock::Text { text } if !text.is_empty() => Some(text.clone()),
                _ => None,
            })
            .collect();
        let out = sanitize(&turns);
        let all_text: Vec<String> = out
            .iter()
            .flat_map(|t| t.content.iter())
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        for text in expected {
            prop_assert!(all_text.contains(&text));
        }
    }

    #[test]
    fn prop_prune_strips_only_oldest(turns in arb_history(), keep in 0usize..4) {
        let mut pruned = sanitize(&turns);
        let before = pruned.clone();
        prune_images(&mut pruned, keep);

        let original = image_turn_count(&before);
        prop_assert_eq!(image_turn_count(&pruned), original.min(keep));
        prop_assert_eq!(pruned.len(), before.len());

        // The newest `keep` image turns are untouched
        let mut kept = 0;
        for (b, p) in before.iter().zip(pruned.iter()).rev() {
            if b.has_image() && kept < keep {
                prop_assert_eq!(b, p);
                kept += 1;
            }
            prop_assert_eq!(b.role, p.role);
        }
    }

    #[test]
    fn prop_history_stays_alternating_for_user_merges(texts in proptest::collection::vec("[a-z]{1,6}", 1..6)) {
        let mut history = ConversationHistory::new();
        for text in texts {
            history.push_user(vec![ContentBlock::text(text)]);
            prop_assert!(is_well_formed(history.turns()));
            history.push(Turn::assistant(vec![ContentBlock::text("ok")]));
            prop_assert!(is_well_formed(history.turns()));
        }
    }
}
