//! Splitting and truncating formatted text to platform length limits.

use super::{utf16_len, Entity, FormattedText};

const ELLIPSIS: &str = "…";

impl FormattedText {
    /// Split into pieces of at most `max_units` UTF-16 code units.
    ///
    /// Cuts prefer the last newline inside the window, then the last space,
    /// then a hard cut on a char boundary. Entities spanning a cut are clipped
    /// to each piece. Whitespace at cut points is dropped.
    pub fn chunk(&self, max_units: usize) -> Vec<FormattedText> {
        let max_units = max_units.max(2);
        if self.utf16_len() <= max_units {
            return vec![self.clone()];
        }

        let text = self.text.as_str();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut start16 = 0usize;

        while start < text.len() {
            let end = cut_point(text, start, max_units);
            let piece = text[start..end].trim_end();
            let piece16 = utf16_len(piece);

            if !piece.is_empty() {
                chunks.push(FormattedText {
                    text: piece.to_string(),
                    entities: clip_entities(&self.entities, start16, start16 + piece16),
                });
            }

            // Skip whitespace at the cut so the next piece starts on content.
            let consumed = &text[start..end];
            let skipped_len = text[end..].len() - text[end..].trim_start().len();
            let next = end + skipped_len;
            start16 += utf16_len(consumed) + utf16_len(&text[end..next]);
            start = next;
        }

        chunks
    }

    /// Shorten to at most `max_units` UTF-16 code units, ending with "…".
    pub fn truncate(&self, max_units: usize) -> FormattedText {
        if self.utf16_len() <= max_units {
            return self.clone();
        }
        let budget = max_units.saturating_sub(utf16_len(ELLIPSIS)).max(1);
        let mut head = self
            .chunk(budget)
            .into_iter()
            .next()
            .unwrap_or_default();
        head.text.push_str(ELLIPSIS);
        head
    }
}

/// Byte index where the piece starting at `start` should end.
fn cut_point(text: &str, start: usize, max_units: usize) -> usize {
    let mut units = 0usize;
    let mut last_newline = None;
    let mut last_space = None;

    for (i, c) in text[start..].char_indices() {
        let width = c.len_utf16();
        if units + width > max_units {
            let hard = start + i;
            return last_newline
                .or(last_space)
                .filter(|&p| p > start)
                .unwrap_or(hard);
        }
        units += width;
        match c {
            '\n' => last_newline = Some(start + i + 1),
            ' ' => last_space = Some(start + i + 1),
            _ => {}
        }
    }

    text.len()
}

/// Entities intersecting `[from, to)`, re-based to `from`.
fn clip_entities(entities: &[Entity], from: usize, to: usize) -> Vec<Entity> {
    entities
        .iter()
        .filter_map(|e| {
            let s = e.offset.max(from);
            let t = e.end().min(to);
            (t > s).then(|| Entity {
                offset: s - from,
                length: t - s,
                ..e.clone()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{convert, EntityKind};

    #[test]
    fn test_short_text_single_chunk() {
        let text = convert("**hello**");
        assert_eq!(text.chunk(4096), vec![text.clone()]);
    }

    #[test]
    fn test_chunks_prefer_newlines() {
        let text = FormattedText::plain("aaaa\nbbbb\ncccc");
        let pieces: Vec<_> = text.chunk(10).into_iter().map(|c| c.text).collect();
        assert_eq!(pieces, vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn test_chunks_fall_back_to_spaces_then_hard_cut() {
        let text = FormattedText::plain("one two three");
        let pieces: Vec<_> = text.chunk(8).into_iter().map(|c| c.text).collect();
        assert_eq!(pieces, vec!["one two", "three"]);

        let text = FormattedText::plain("abcdefghij");
        let pieces: Vec<_> = text.chunk(4).into_iter().map(|c| c.text).collect();
        assert_eq!(pieces, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_chunks_never_split_surrogate_pairs() {
        let text = FormattedText::plain("😀😀😀");
        for piece in text.chunk(3) {
            assert!(piece.utf16_len() <= 3);
            assert_eq!(piece.text, "😀");
        }
    }

    #[test]
    fn test_entity_clipped_across_chunks() {
        let mut text = FormattedText::plain("aaaa bbbb");
        text.entities
            .push(Entity::new(EntityKind::Bold, 2, 5));
        let pieces = text.chunk(5);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].text, "aaaa");
        assert_eq!(pieces[0].entities, vec![Entity::new(EntityKind::Bold, 2, 2)]);
        assert_eq!(pieces[1].text, "bbbb");
        assert_eq!(pieces[1].entities, vec![Entity::new(EntityKind::Bold, 0, 2)]);
    }

    #[test]
    fn test_all_chunks_within_limit() {
        let long = "word ".repeat(2000);
        let text = convert(&format!("**{}**", long.trim()));
        for piece in text.chunk(4096) {
            assert!(piece.utf16_len() <= 4096);
            for e in &piece.entities {
                assert!(e.end() <= piece.utf16_len());
            }
        }
    }

    #[test]
    fn test_truncate_appends_ellipsis() {
        let text = FormattedText::plain("hello world");
        let short = text.truncate(8);
        assert_eq!(short.text, "hello…");
        assert!(short.utf16_len() <= 8);
        assert_eq!(text.truncate(100), text);
    }
}
