//! Format command handler.

use std::io::Read;

use anyhow::{Context, Result};

use zeptorelay::config::Config;
use zeptorelay::format::Formatter;

/// Convert markdown from the argument or stdin and print it as JSON.
pub(crate) fn cmd_format(
    config: &Config,
    text: Option<String>,
    max_length: Option<usize>,
    compact: bool,
) -> Result<()> {
    let markdown = match text.as_deref() {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read markdown from stdin")?;
            buf
        }
        Some(text) => text.to_string(),
    };

    let formatted = Formatter::new(&config.format).convert(&markdown);
    let value = match max_length {
        Some(max) => serde_json::to_value(formatted.chunk(max.max(1)))?,
        None => serde_json::to_value(&formatted)?,
    };

    let out = if compact {
        serde_json::to_string(&value)?
    } else {
        serde_json::to_string_pretty(&value)?
    };
    println!("{}", out);
    Ok(())
}
