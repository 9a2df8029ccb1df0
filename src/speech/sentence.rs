//! Sentence-boundary buffering between text deltas and the synthesizer

/// Accumulates streamed text and releases it one sentence at a time.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace; the released
/// sentence includes the terminator and that single whitespace character.
#[derive(Debug, Default)]
pub struct SentenceStreamer {
    buffer: String,
}

impl SentenceStreamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return every sentence it completed, in order
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut sentences = Vec::new();
        while let Some(end) = self.next_boundary() {
            let rest = self.buffer.split_off(end);
            sentences.push(std::mem::replace(&mut self.buffer, rest));
        }
        sentences
    }

    /// Take whatever is left, if it holds anything besides whitespace
    pub fn take_remainder(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        (!remainder.trim().is_empty()).then_some(remainder)
    }

    /// Drop buffered text without releasing it
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Byte offset just past the first terminator + whitespace pair
    fn next_boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?') {
                if let Some(&(idx, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(idx + next.len_utf8());
                    }
                }
            }
        }
        None
    }
}
