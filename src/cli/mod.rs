//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod format;
pub mod simulate;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use zeptorelay::config::Config;

#[derive(Parser)]
#[command(name = "zeptorelay")]
#[command(version)]
#[command(about = "Rate-limited delivery and live progress for chat-bot agents", long_about = None)]
struct Cli {
    /// Config file (default: ~/.zeptorelay/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert markdown to plain text plus formatting entities (JSON)
    Format {
        /// Markdown to convert; `-` or omitted reads stdin
        text: Option<String>,
        /// Split into messages of at most this many UTF-16 units
        #[arg(long, value_name = "UNITS")]
        max_length: Option<usize>,
        /// Single-line JSON output
        #[arg(long)]
        compact: bool,
    },
    /// Print the effective configuration
    Config {
        /// Validate instead of printing
        #[arg(long)]
        check: bool,
    },
    /// Run a scripted agent turn against a console platform
    Simulate {
        /// Conversation id used for the run
        #[arg(long, default_value = "sim-chat")]
        chat: String,
        /// Number of tool calls in the scripted turn
        #[arg(long, default_value_t = 6)]
        steps: usize,
        /// Delay between agent events, in milliseconds
        #[arg(long, default_value_t = 400)]
        delay_ms: u64,
        /// Aggregate steps into an anchor message instead of a status line
        #[arg(long)]
        anchor: bool,
        /// Fail every Nth edit with a flood-control error
        #[arg(long, value_name = "N")]
        throttle_every: Option<u64>,
    },
    /// Show version information
    Version,
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load config early so the logging settings apply to every command;
    // a broken config still gets reported by the command itself.
    let loaded = load_config(cli.config.as_deref());
    let logging_cfg = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = zeptorelay::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Format {
            text,
            max_length,
            compact,
        }) => {
            format::cmd_format(&loaded?, text, max_length, compact)?;
        }
        Some(Commands::Config { check }) => {
            config::cmd_config(cli.config.as_deref(), loaded, check)?;
        }
        Some(Commands::Simulate {
            chat,
            steps,
            delay_ms,
            anchor,
            throttle_every,
        }) => {
            let options = simulate::SimulateOptions {
                chat,
                steps,
                delay_ms,
                anchor,
                throttle_every,
            };
            simulate::cmd_simulate(loaded?, options).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> zeptorelay::Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn cmd_version() {
    println!("zeptorelay {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Rate-limited delivery and live progress for chat-bot agents");
}
