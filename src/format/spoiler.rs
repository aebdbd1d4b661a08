//! `||spoiler||` handling.
//!
//! The markdown parser has no spoiler syntax, so spans are cut out of the
//! source before parsing and matched back onto the flattened output.

use super::{utf16_len, Entity, EntityKind};

/// Remove `||...||` delimiters outside code, returning the stripped markdown
/// and each spoiler's inner source in order of appearance.
///
/// Unpaired delimiters are left untouched.
pub fn strip_spoilers(markdown: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(markdown.len());
    let mut spoilers = Vec::new();
    let mut in_fence = false;

    for line in markdown.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push_str(line);
            continue;
        }
        if in_fence {
            out.push_str(line);
            continue;
        }
        strip_line(line, &mut out, &mut spoilers);
    }

    (out, spoilers)
}

/// Strip spoilers from one line, skipping backtick code spans.
fn strip_line(line: &str, out: &mut String, spoilers: &mut Vec<String>) {
    let mut rest = line;
    while !rest.is_empty() {
        let next_tick = rest.find('`');
        let next_bar = rest.find("||");

        match (next_tick, next_bar) {
            (Some(t), Some(b)) if t < b => {
                // Copy through the closing backtick, or the rest of the line.
                let after = &rest[t + 1..];
                let end = after.find('`').map(|e| t + 1 + e + 1).unwrap_or(rest.len());
                out.push_str(&rest[..end]);
                rest = &rest[end..];
            }
            (_, Some(b)) => {
                let inner_start = b + 2;
                match rest[inner_start..].find("||") {
                    Some(len) if len > 0 => {
                        out.push_str(&rest[..b]);
                        let inner = &rest[inner_start..inner_start + len];
                        out.push_str(inner);
                        spoilers.push(inner.to_string());
                        rest = &rest[inner_start + len + 2..];
                    }
                    Some(_) => {
                        // Empty pair: keep it literally and scan on.
                        out.push_str(&rest[..inner_start + 2]);
                        rest = &rest[inner_start + 2..];
                    }
                    None => {
                        out.push_str(rest);
                        rest = "";
                    }
                }
            }
            _ => {
                out.push_str(rest);
                rest = "";
            }
        }
    }
}

/// Attach a spoiler entity for each needle at its first unclaimed occurrence
/// in `text`. Needles that cannot be found are skipped.
pub fn attach_spoilers(text: &str, needles: &[String], entities: &mut Vec<Entity>) {
    let mut claimed: Vec<(usize, usize)> = Vec::new();

    for needle in needles {
        if needle.is_empty() {
            continue;
        }
        let found = text.match_indices(needle.as_str()).find(|(start, _)| {
            let end = start + needle.len();
            !claimed.iter().any(|(s, e)| *start < *e && *s < end)
        });
        let Some((start, _)) = found else {
            tracing::debug!(needle = %needle, "Spoiler text not found after formatting");
            continue;
        };
        let end = start + needle.len();
        claimed.push((start, end));
        entities.push(Entity::new(
            EntityKind::Spoiler,
            utf16_len(&text[..start]),
            utf16_len(needle),
        ));
    }
}
