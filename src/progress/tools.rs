//! Typed tool inputs and the per-tool display table.
//!
//! Agent tool calls arrive as a name plus an arbitrary JSON payload. We parse
//! the payload once into a [`ToolInput`] variant carrying only the fields that
//! matter for display, then look the tool up in a static table of
//! [`ToolSpec`]s to get its category, visibility tier, icon and summarizer.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::utils::string::preview;

/// Max chars of a command or query shown in a step line.
const SUMMARY_CHARS: usize = 60;

/// What kind of work a tool does; drives the counts in final summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Read,
    Edit,
    Write,
    Command,
    Search,
    Web,
    Internal,
}

impl ToolCategory {
    /// Plural label for summary counts ("3 reads").
    pub fn label(&self, count: usize) -> String {
        let (one, many) = match self {
            ToolCategory::Read => ("read", "reads"),
            ToolCategory::Edit => ("edit", "edits"),
            ToolCategory::Write => ("write", "writes"),
            ToolCategory::Command => ("command", "commands"),
            ToolCategory::Search => ("search", "searches"),
            ToolCategory::Web => ("web request", "web requests"),
            ToolCategory::Internal => ("internal step", "internal steps"),
        };
        format!("{} {}", count, if count == 1 { one } else { many })
    }
}

/// How prominently a step is shown in the live status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolTier {
    /// Writes and commands: always listed individually
    High,
    /// Reads and searches: collapsed into a count past a threshold
    Medium,
    /// Bookkeeping: counted, never listed
    Low,
}

/// Tool input reduced to the fields shown to users.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Read {
        file_path: String,
    },
    Edit {
        file_path: String,
    },
    Write {
        file_path: String,
        lines: usize,
    },
    Bash {
        command: String,
        description: Option<String>,
    },
    Grep {
        pattern: String,
        path: Option<String>,
    },
    Glob {
        pattern: String,
    },
    WebFetch {
        url: String,
    },
    WebSearch {
        query: String,
    },
    Task {
        description: String,
    },
    TodoWrite {
        total: usize,
        completed: usize,
    },
    Other {
        name: String,
    },
}

fn str_field(input: &Value, key: &str) -> Option<String> {
    input.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_field(input: &Value, key: &str) -> String {
    str_field(input, key).unwrap_or_default()
}

impl ToolInput {
    /// Parse a raw tool payload. Unknown tools and missing fields never fail.
    pub fn from_json(name: &str, input: &Value) -> Self {
        match name {
            "Read" | "NotebookRead" => ToolInput::Read {
                file_path: str_field(input, "file_path")
                    .or_else(|| str_field(input, "notebook_path"))
                    .unwrap_or_default(),
            },
            "Edit" | "MultiEdit" | "NotebookEdit" => ToolInput::Edit {
                file_path: str_field(input, "file_path")
                    .or_else(|| str_field(input, "notebook_path"))
                    .unwrap_or_default(),
            },
            "Write" => ToolInput::Write {
                file_path: string_field(input, "file_path"),
                lines: input
                    .get("content")
                    .and_then(Value::as_str)
                    .map(|c| c.lines().count())
                    .unwrap_or(0),
            },
            "Bash" => ToolInput::Bash {
                command: string_field(input, "command"),
                description: str_field(input, "description"),
            },
            "Grep" => ToolInput::Grep {
                pattern: string_field(input, "pattern"),
                path: str_field(input, "path"),
            },
            "Glob" => ToolInput::Glob {
                pattern: string_field(input, "pattern"),
            },
            "WebFetch" => ToolInput::WebFetch {
                url: string_field(input, "url"),
            },
            "WebSearch" => ToolInput::WebSearch {
                query: string_field(input, "query"),
            },
            "Task" | "Agent" => ToolInput::Task {
                description: str_field(input, "description")
                    .or_else(|| str_field(input, "prompt"))
                    .unwrap_or_default(),
            },
            "TodoWrite" => {
                let todos = input
                    .get("todos")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                let completed = todos
                    .iter()
                    .filter(|t| t.get("status").and_then(Value::as_str) == Some("completed"))
                    .count();
                ToolInput::TodoWrite {
                    total: todos.len(),
                    completed,
                }
            }
            other => ToolInput::Other {
                name: other.to_string(),
            },
        }
    }

    /// Display table entry for this input's tool.
    pub fn spec(&self) -> &'static ToolSpec {
        let name = match self {
            ToolInput::Read { .. } => "Read",
            ToolInput::Edit { .. } => "Edit",
            ToolInput::Write { .. } => "Write",
            ToolInput::Bash { .. } => "Bash",
            ToolInput::Grep { .. } => "Grep",
            ToolInput::Glob { .. } => "Glob",
            ToolInput::WebFetch { .. } => "WebFetch",
            ToolInput::WebSearch { .. } => "WebSearch",
            ToolInput::Task { .. } => "Task",
            ToolInput::TodoWrite { .. } => "TodoWrite",
            ToolInput::Other { .. } => "",
        };
        tool_spec(name)
    }

    /// One-line description, e.g. "src/main.rs" or "cargo test".
    pub fn summary(&self) -> String {
        (self.spec().summarize)(self)
    }
}

impl fmt::Display for ToolInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary();
        let spec = self.spec();
        let name = match self {
            ToolInput::Other { name } => name.as_str(),
            _ => spec.name,
        };
        if summary.is_empty() {
            write!(f, "{} {}", spec.icon, name)
        } else {
            write!(f, "{} {}: {}", spec.icon, name, summary)
        }
    }
}

/// Static per-tool display properties.
pub struct ToolSpec {
    pub name: &'static str,
    pub category: ToolCategory,
    pub tier: ToolTier,
    pub icon: &'static str,
    pub summarize: fn(&ToolInput) -> String,
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Last two path components: "/home/u/proj/src/main.rs" → "src/main.rs".
fn short_path(path: &str) -> String {
    let parts: Vec<&str> = path.rsplit('/').filter(|p| !p.is_empty()).take(2).collect();
    parts.into_iter().rev().collect::<Vec<_>>().join("/")
}

fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    rest.split(['/', '?', '#']).next().unwrap_or(rest).to_string()
}

fn summarize_path(input: &ToolInput) -> String {
    match input {
        ToolInput::Read { file_path } | ToolInput::Edit { file_path } => short_path(file_path),
        ToolInput::Write { file_path, lines } if *lines > 0 => {
            format!("{} ({} lines)", short_path(file_path), lines)
        }
        ToolInput::Write { file_path, .. } => short_path(file_path),
        _ => String::new(),
    }
}

fn summarize_command(input: &ToolInput) -> String {
    match input {
        ToolInput::Bash {
            description: Some(d),
            ..
        } if !d.trim().is_empty() => preview(d.trim(), SUMMARY_CHARS),
        ToolInput::Bash { command, .. } => {
            preview(command.lines().next().unwrap_or("").trim(), SUMMARY_CHARS)
        }
        _ => String::new(),
    }
}

fn summarize_search(input: &ToolInput) -> String {
    match input {
        ToolInput::Grep {
            pattern,
            path: Some(path),
        } => format!("\"{}\" in {}", preview(pattern, SUMMARY_CHARS), short_path(path)),
        ToolInput::Grep { pattern, .. } | ToolInput::Glob { pattern } => {
            format!("\"{}\"", preview(pattern, SUMMARY_CHARS))
        }
        _ => String::new(),
    }
}

fn summarize_web(input: &ToolInput) -> String {
    match input {
        ToolInput::WebFetch { url } => host_of(url),
        ToolInput::WebSearch { query } => format!("\"{}\"", preview(query, SUMMARY_CHARS)),
        _ => String::new(),
    }
}

fn summarize_task(input: &ToolInput) -> String {
    match input {
        ToolInput::Task { description } => preview(description, SUMMARY_CHARS),
        _ => String::new(),
    }
}

fn summarize_todos(input: &ToolInput) -> String {
    match input {
        ToolInput::TodoWrite { total, completed } => format!("{}/{} done", completed, total),
        _ => String::new(),
    }
}

fn summarize_nothing(_: &ToolInput) -> String {
    String::new()
}

static TOOL_SPECS: &[ToolSpec] = &[
    ToolSpec {
        name: "Read",
        category: ToolCategory::Read,
        tier: ToolTier::Medium,
        icon: "📖",
        summarize: summarize_path,
    },
    ToolSpec {
        name: "Edit",
        category: ToolCategory::Edit,
        tier: ToolTier::High,
        icon: "✏️",
        summarize: summarize_path,
    },
    ToolSpec {
        name: "Write",
        category: ToolCategory::Write,
        tier: ToolTier::High,
        icon: "📝",
        summarize: summarize_path,
    },
    ToolSpec {
        name: "Bash",
        category: ToolCategory::Command,
        tier: ToolTier::High,
        icon: "⚡",
        summarize: summarize_command,
    },
    ToolSpec {
        name: "Grep",
        category: ToolCategory::Search,
        tier: ToolTier::Medium,
        icon: "🔍",
        summarize: summarize_search,
    },
    ToolSpec {
        name: "Glob",
        category: ToolCategory::Search,
        tier: ToolTier::Medium,
        icon: "🔍",
        summarize: summarize_search,
    },
    ToolSpec {
        name: "WebFetch",
        category: ToolCategory::Web,
        tier: ToolTier::Medium,
        icon: "🌐",
        summarize: summarize_web,
    },
    ToolSpec {
        name: "WebSearch",
        category: ToolCategory::Web,
        tier: ToolTier::Medium,
        icon: "🌐",
        summarize: summarize_web,
    },
    ToolSpec {
        name: "Task",
        category: ToolCategory::Command,
        tier: ToolTier::High,
        icon: "🤖",
        summarize: summarize_task,
    },
    ToolSpec {
        name: "TodoWrite",
        category: ToolCategory::Internal,
        tier: ToolTier::Low,
        icon: "📋",
        summarize: summarize_todos,
    },
];

static OTHER_SPEC: ToolSpec = ToolSpec {
    name: "tool",
    category: ToolCategory::Command,
    tier: ToolTier::Medium,
    icon: "🔧",
    summarize: summarize_nothing,
};

/// Look up a tool's display properties; unknown tools get a generic entry.
pub fn tool_spec(name: &str) -> &'static ToolSpec {
    TOOL_SPECS
        .iter()
        .find(|s| s.name == name)
        .unwrap_or(&OTHER_SPEC)
}
