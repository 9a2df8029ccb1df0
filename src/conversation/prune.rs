//! Context-size control for image-bearing turns

use crate::llm::{ContentBlock, Turn};

/// Left in a turn whose only content was images
pub const IMAGE_OMITTED_PLACEHOLDER: &str = "[image omitted]";

/// Strip image blocks from all but the `keep` most recent image-bearing turns.
///
/// Turn order and co-located text are preserved.
pub fn prune_images(turns: &mut [Turn], keep: usize) {
    let image_turns: Vec<usize> = turns
        .iter()
        .enumerate()
        .filter(|(_, turn)| turn.has_image())
        .map(|(i, _)| i)
        .collect();

    let strip = image_turns.len().saturating_sub(keep);
    for &i in image_turns.iter().take(strip) {
        let turn = &mut turns[i];
        turn.content
            .retain(|block| !matches!(block, ContentBlock::Image { .. }));
        if turn.content.is_empty() {
            turn.content.push(ContentBlock::text(IMAGE_OMITTED_PLACEHOLDER));
        }
    }
}
