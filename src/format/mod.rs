//! Rich-text formatter: markdown in, flat text plus positional entities out.
//!
//! Chat platforms such as Telegram accept formatting either as inline markup
//! (fragile to escape) or as a list of entities over plain text. We produce the
//! latter. Offsets and lengths are measured in UTF-16 code units over the
//! flattened output, which is what the Bot API expects.
//!
//! ```
//! use zeptorelay::format::{convert, EntityKind};
//!
//! let out = convert("**bold** and ||secret||");
//! assert_eq!(out.text, "bold and secret");
//! assert_eq!(out.entities[0].kind, EntityKind::Bold);
//! assert_eq!((out.entities[0].offset, out.entities[0].length), (0, 4));
//! assert_eq!(out.entities[1].kind, EntityKind::Spoiler);
//! assert_eq!((out.entities[1].offset, out.entities[1].length), (9, 6));
//! ```

pub mod chunk;
pub mod spoiler;

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

use crate::config::FormatConfig;

/// Formatting applied to a range of the flattened text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Bold,
    Italic,
    Strikethrough,
    Spoiler,
    Code,
    Pre,
    TextLink,
    Blockquote,
    ExpandableBlockquote,
}

/// A positional formatting annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Start, in UTF-16 code units
    pub offset: usize,
    /// Length, in UTF-16 code units
    pub length: usize,
    /// Target of a `TextLink`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Language of a `Pre` block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Entity {
    pub fn new(kind: EntityKind, offset: usize, length: usize) -> Self {
        Self {
            kind,
            offset,
            length,
            url: None,
            language: None,
        }
    }

    /// Exclusive end, in UTF-16 code units.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Wire-ready text: plain text plus entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedText {
    pub text: String,
    pub entities: Vec<Entity>,
}

impl FormattedText {
    /// Unformatted text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entities: Vec::new(),
        }
    }

    /// Length in UTF-16 code units.
    pub fn utf16_len(&self) -> usize {
        utf16_len(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Append unformatted text.
    pub fn push(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    /// Append text covered by one entity.
    pub fn push_entity(&mut self, kind: EntityKind, text: &str) -> &mut Self {
        let offset = self.utf16_len();
        self.text.push_str(text);
        let length = utf16_len(text);
        if length > 0 {
            self.entities.push(Entity::new(kind, offset, length));
        }
        self
    }

    /// Wrap everything appended by `f` in one entity.
    pub fn wrap(&mut self, kind: EntityKind, f: impl FnOnce(&mut Self)) -> &mut Self {
        let offset = self.utf16_len();
        f(self);
        let end = self.utf16_len();
        if end > offset {
            self.entities.push(Entity::new(kind, offset, end - offset));
            self.entities.sort_by_key(|e| e.offset);
        }
        self
    }
}

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Convert markdown with the default [`FormatConfig`].
pub fn convert(markdown: &str) -> FormattedText {
    Formatter::default().convert(markdown)
}

/// Markdown → [`FormattedText`] converter.
#[derive(Debug, Clone)]
pub struct Formatter {
    expandable_quote_lines: usize,
    expandable_quote_length: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(&FormatConfig::default())
    }
}

impl Formatter {
    pub fn new(config: &FormatConfig) -> Self {
        Self {
            expandable_quote_lines: config.expandable_quote_lines,
            expandable_quote_length: config.expandable_quote_length,
        }
    }

    /// Convert markdown to flat text and entities.
    ///
    /// `||spoiler||` spans are removed before parsing (CommonMark has no such
    /// syntax) and re-attached as entities over the flattened output.
    pub fn convert(&self, markdown: &str) -> FormattedText {
        let (stripped, spoilers) = spoiler::strip_spoilers(markdown);
        let mut out = self.render(&stripped);
        if !spoilers.is_empty() {
            let needles: Vec<String> = spoilers.iter().map(|s| self.render(s).text).collect();
            spoiler::attach_spoilers(&out.text, &needles, &mut out.entities);
            out.entities.sort_by_key(|e| e.offset);
        }
        out
    }

    fn render(&self, markdown: &str) -> FormattedText {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_TASKLISTS);

        let mut w = Writer::new(self);
        for event in Parser::new_ext(markdown, options) {
            w.event(event);
        }
        w.finish()
    }
}

struct Open {
    kind: EntityKind,
    offset: usize,
    byte_offset: usize,
    url: Option<String>,
    language: Option<String>,
}

/// Depth-first writer over the parser's start/end events.
struct Writer<'a> {
    formatter: &'a Formatter,
    text: String,
    len16: usize,
    entities: Vec<Entity>,
    open: Vec<Open>,
    lists: Vec<Option<u64>>,
    in_code_block: bool,
    in_item: usize,
    /// A list prefix was written and no item content has followed yet.
    item_pending: bool,
}

impl<'a> Writer<'a> {
    fn new(formatter: &'a Formatter) -> Self {
        Self {
            formatter,
            text: String::new(),
            len16: 0,
            entities: Vec::new(),
            open: Vec::new(),
            lists: Vec::new(),
            in_code_block: false,
            in_item: 0,
            item_pending: false,
        }
    }

    fn push(&mut self, s: &str) {
        if !s.is_empty() {
            self.item_pending = false;
        }
        self.text.push_str(s);
        self.len16 += utf16_len(s);
    }

    fn trailing_newlines(&self) -> usize {
        self.text.chars().rev().take_while(|c| *c == '\n').count()
    }

    /// End the current line (no-op at the start of a line or of the text).
    fn line_break(&mut self) {
        if !self.text.is_empty() && self.trailing_newlines() == 0 {
            self.push("\n");
        }
    }

    /// Separate blocks by exactly one blank line.
    fn block_break(&mut self) {
        if self.text.is_empty() {
            return;
        }
        for _ in self.trailing_newlines()..2 {
            self.push("\n");
        }
    }

    fn open(&mut self, kind: EntityKind) {
        self.open_with(kind, None, None);
    }

    fn open_with(&mut self, kind: EntityKind, url: Option<String>, language: Option<String>) {
        self.open.push(Open {
            kind,
            offset: self.len16,
            byte_offset: self.text.len(),
            url,
            language,
        });
    }

    /// Close the innermost open entity matching `pred`; zero-length entities are dropped.
    fn close(&mut self, pred: impl Fn(EntityKind) -> bool) {
        let Some(idx) = self.open.iter().rposition(|o| pred(o.kind)) else {
            return;
        };
        let open = self.open.remove(idx);
        let length = self.len16 - open.offset;
        if length > 0 {
            self.entities.push(Entity {
                kind: open.kind,
                offset: open.offset,
                length,
                url: open.url,
                language: open.language,
            });
        }
    }

    /// Close a block-level entity, excluding trailing newlines from its range.
    fn close_block(&mut self, pred: impl Fn(EntityKind) -> bool) {
        let Some(idx) = self.open.iter().rposition(|o| pred(o.kind)) else {
            return;
        };
        let open = self.open.remove(idx);
        let content = self.text[open.byte_offset..].trim_end_matches('\n');
        let length = utf16_len(content);
        if length == 0 {
            return;
        }
        let kind = if open.kind == EntityKind::Blockquote
            && (content.lines().count() > self.formatter.expandable_quote_lines
                || length > self.formatter.expandable_quote_length)
        {
            EntityKind::ExpandableBlockquote
        } else {
            open.kind
        };
        self.entities.push(Entity {
            kind,
            offset: open.offset,
            length,
            url: open.url,
            language: open.language,
        });
    }

    fn event(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.push(&text),
            Event::Code(code) => {
                let offset = self.len16;
                self.push(&code);
                if self.len16 > offset {
                    self.entities
                        .push(Entity::new(EntityKind::Code, offset, self.len16 - offset));
                }
            }
            Event::SoftBreak | Event::HardBreak => self.push("\n"),
            Event::Rule => {
                self.block_break();
                self.push("──────────");
                self.block_break();
            }
            Event::TaskListMarker(checked) => self.push(if checked { "☑ " } else { "☐ " }),
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Paragraph => {
                if self.in_item > 0 && !self.item_pending {
                    self.line_break();
                }
            }
            Tag::Heading { .. } => {
                self.block_break();
                self.open(EntityKind::Bold);
            }
            Tag::BlockQuote(_) => {
                self.block_break();
                self.open(EntityKind::Blockquote);
            }
            Tag::CodeBlock(kind) => {
                self.block_break();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                    CodeBlockKind::Indented => None,
                };
                self.open_with(EntityKind::Pre, None, language);
                self.in_code_block = true;
            }
            Tag::List(start) => {
                if self.lists.is_empty() {
                    self.block_break();
                } else {
                    self.line_break();
                }
                self.lists.push(start);
            }
            Tag::Item => {
                self.line_break();
                self.in_item += 1;
                let depth = self.lists.len().saturating_sub(1);
                let indent = "  ".repeat(depth);
                let prefix = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let p = format!("{}{}. ", indent, n);
                        *n += 1;
                        p
                    }
                    _ => format!("{}• ", indent),
                };
                self.push(&prefix);
                self.item_pending = true;
            }
            Tag::Strong => self.open(EntityKind::Bold),
            Tag::Emphasis => self.open(EntityKind::Italic),
            Tag::Strikethrough => self.open(EntityKind::Strikethrough),
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.open_with(EntityKind::TextLink, Some(dest_url.to_string()), None);
            }
            Tag::Table(_) => {
                self.block_break();
                self.open(EntityKind::Pre);
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.in_item > 0 {
                    self.line_break();
                } else {
                    self.block_break();
                }
            }
            TagEnd::Heading(_) => {
                self.close(|k| k == EntityKind::Bold);
                self.block_break();
            }
            TagEnd::BlockQuote(_) => {
                self.close_block(|k| k == EntityKind::Blockquote);
                self.block_break();
            }
            TagEnd::CodeBlock => {
                self.close_block(|k| k == EntityKind::Pre);
                self.in_code_block = false;
                self.block_break();
            }
            TagEnd::List(_) => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block_break();
                } else {
                    self.line_break();
                }
            }
            TagEnd::Item => {
                self.in_item = self.in_item.saturating_sub(1);
                self.line_break();
            }
            TagEnd::Strong => self.close(|k| k == EntityKind::Bold),
            TagEnd::Emphasis => self.close(|k| k == EntityKind::Italic),
            TagEnd::Strikethrough => self.close(|k| k == EntityKind::Strikethrough),
            TagEnd::Link | TagEnd::Image => self.close(|k| k == EntityKind::TextLink),
            TagEnd::TableCell => self.push(" | "),
            TagEnd::TableHead | TagEnd::TableRow => {
                if self.text.ends_with(" | ") {
                    self.text.truncate(self.text.len() - 3);
                    self.len16 -= 3;
                }
                self.push("\n");
            }
            TagEnd::Table => {
                self.close_block(|k| k == EntityKind::Pre);
                self.block_break();
            }
            _ => {}
        }
    }

    fn finish(mut self) -> FormattedText {
        // Entities left open by malformed input close at the end of the text.
        while !self.open.is_empty() {
            self.close(|_| true);
        }

        let trimmed_len = self.text.trim_end().len();
        self.text.truncate(trimmed_len);
        let len16 = utf16_len(&self.text);

        let mut entities: Vec<Entity> = self
            .entities
            .into_iter()
            .filter(|e| e.offset < len16)
            .map(|mut e| {
                e.length = e.length.min(len16 - e.offset);
                e
            })
            .filter(|e| e.length > 0)
            .collect();
        entities.sort_by_key(|e| e.offset);

        FormattedText {
            text: self.text,
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(out: &FormattedText, kind: EntityKind) -> &Entity {
        out.entities
            .iter()
            .find(|e| e.kind == kind)
            .unwrap_or_else(|| panic!("no {kind:?} entity in {out:?}"))
    }

    fn covered(out: &FormattedText, e: &Entity) -> String {
        let units: Vec<u16> = out.text.encode_utf16().collect();
        String::from_utf16(&units[e.offset..e.end()]).unwrap()
    }

    #[test]
    fn test_bold_and_spoiler_scenario() {
        let out = convert("**bold** and ||secret||");
        assert_eq!(out.text, "bold and secret");
        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.entities[0], Entity::new(EntityKind::Bold, 0, 4));
        assert_eq!(out.entities[1], Entity::new(EntityKind::Spoiler, 9, 6));
    }

    #[test]
    fn test_spoiler_after_empty_pair() {
        let out = convert("a |||| b ||c||");
        assert_eq!(out.text, "a |||| b c");
        assert_eq!(out.entities, vec![Entity::new(EntityKind::Spoiler, 9, 1)]);
    }

    #[test]
    fn test_inline_formatting() {
        let out = convert("*it* ~~gone~~ `x = 1` [site](https://example.com)");
        assert_eq!(out.text, "it gone x = 1 site");
        assert_eq!(covered(&out, entity(&out, EntityKind::Italic)), "it");
        assert_eq!(covered(&out, entity(&out, EntityKind::Strikethrough)), "gone");
        assert_eq!(covered(&out, entity(&out, EntityKind::Code)), "x = 1");
        let link = entity(&out, EntityKind::TextLink);
        assert_eq!(covered(&out, link), "site");
        assert_eq!(link.url.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_heading_becomes_bold() {
        let out = convert("### Heading\nbody");
        assert_eq!(out.text, "Heading\n\nbody");
        assert_eq!(out.entities, vec![Entity::new(EntityKind::Bold, 0, 7)]);
    }

    #[test]
    fn test_fenced_code_with_language() {
        let out = convert("Run:\n\n```rust\nfn main() {}\n```\n\nDone");
        assert_eq!(out.text, "Run:\n\nfn main() {}\n\nDone");
        let pre = entity(&out, EntityKind::Pre);
        assert_eq!(pre.language.as_deref(), Some("rust"));
        assert_eq!(covered(&out, pre), "fn main() {}");
    }

    #[test]
    fn test_code_block_keeps_markup_literal() {
        let out = convert("```\n**not bold** ||not spoiler||\n```");
        assert_eq!(out.text, "**not bold** ||not spoiler||");
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].kind, EntityKind::Pre);
        assert_eq!(out.entities[0].language, None);
    }

    #[test]
    fn test_lists() {
        let out = convert("- one\n- two\n\n1. first\n2. second");
        assert_eq!(out.text, "• one\n• two\n\n1. first\n2. second");

        // Loose lists wrap each item in a paragraph.
        assert_eq!(convert("- one\n\n- two").text, "• one\n• two");
        assert_eq!(convert("1. first\n\n2. second").text, "1. first\n2. second");
        assert_eq!(
            convert("- one\n\n  more\n\n- two").text,
            "• one\nmore\n• two"
        );
    }

    #[test]
    fn test_nested_list_indents() {
        let out = convert("- outer\n  - inner\n- next");
        assert_eq!(out.text, "• outer\n  • inner\n• next");
    }

    #[test]
    fn test_blank_lines_collapse() {
        let out = convert("first\n\n\n\n\nsecond\n\n\n");
        assert_eq!(out.text, "first\n\nsecond");
    }

    #[test]
    fn test_short_blockquote() {
        let out = convert("> quoted line\n\nafter");
        assert_eq!(out.text, "quoted line\n\nafter");
        let quote = entity(&out, EntityKind::Blockquote);
        assert_eq!(covered(&out, quote), "quoted line");
    }

    #[test]
    fn test_long_blockquote_is_expandable() {
        let out = convert("> a\n>\n> b\n>\n> c\n>\n> d");
        assert!(out
            .entities
            .iter()
            .any(|e| e.kind == EntityKind::ExpandableBlockquote));
        assert!(!out.entities.iter().any(|e| e.kind == EntityKind::Blockquote));
    }

    #[test]
    fn test_utf16_offsets_with_emoji() {
        // 😀 is two UTF-16 code units.
        let out = convert("😀 **hi**");
        assert_eq!(out.text, "😀 hi");
        assert_eq!(out.entities, vec![Entity::new(EntityKind::Bold, 3, 2)]);
    }

    #[test]
    fn test_repeated_spoilers_claim_distinct_occurrences() {
        let out = convert("||x|| and ||x||");
        assert_eq!(out.text, "x and x");
        let spoilers: Vec<_> = out
            .entities
            .iter()
            .filter(|e| e.kind == EntityKind::Spoiler)
            .map(|e| e.offset)
            .collect();
        assert_eq!(spoilers, vec![0, 6]);
    }

    #[test]
    fn test_table_renders_as_pre() {
        let out = convert("| a | b |\n|---|---|\n| 1 | 2 |");
        assert_eq!(out.text, "a | b\n1 | 2");
        assert_eq!(entity(&out, EntityKind::Pre).length, utf16_len("a | b\n1 | 2"));
    }

    #[test]
    fn test_empty_emphasis_dropped() {
        let out = convert("a [](https://example.com)");
        assert_eq!(out.text, "a");
        assert!(out.entities.is_empty());
    }

    #[test]
    fn test_entities_stay_within_text() {
        let samples = [
            "",
            "plain",
            "**unclosed bold",
            "> quote with **bold** at end\n\n",
            "- [ ] todo\n- [x] done",
            "a ||b|| c ||d **e**||",
            "```py\nprint('x')\n\n\n```\n\n\n\n",
            "# Title\n\n---\n\n_it_ 🎉 `c`",
            "||unclosed spoiler",
            "nested **bold *and italic* text** end",
        ];
        for sample in samples {
            let out = convert(sample);
            let len = out.utf16_len();
            for e in &out.entities {
                assert!(e.length > 0, "zero-length entity for {sample:?}");
                assert!(e.end() <= len, "entity {e:?} out of range for {sample:?}");
            }
        }
    }
}
