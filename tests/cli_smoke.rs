//! CLI smoke tests: run the compiled binary and check exit codes and output.
//!
//! Every test points `--config` at a temp path so the user's own
//! `~/.zeptorelay/config.json` never leaks in.

use std::io::Write;
use std::process::{Command, Stdio};

use tempfile::TempDir;

/// Helper: run zeptorelay with given args and return (exit_code, stdout, stderr).
fn run_cli(args: &[&str], stdin: Option<&str>) -> (i32, String, String) {
    let bin = env!("CARGO_BIN_EXE_zeptorelay");
    let mut child = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "off") // suppress tracing noise
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to execute zeptorelay binary");
    {
        let mut pipe = child.stdin.take().expect("stdin pipe");
        if let Some(input) = stdin {
            pipe.write_all(input.as_bytes()).expect("write stdin");
        }
    }
    let output = child.wait_with_output().expect("wait for zeptorelay");
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

fn missing_config(dir: &TempDir) -> String {
    dir.path().join("config.json").to_string_lossy().into_owned()
}

// ============================================================================
// Help & Version
// ============================================================================

#[test]
fn cli_no_args_shows_help() {
    let (code, stdout, _stderr) = run_cli(&[], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("zeptorelay"));
}

#[test]
fn cli_help_lists_commands() {
    let (code, stdout, _stderr) = run_cli(&["--help"], None);
    assert_eq!(code, 0);
    for cmd in ["format", "config", "simulate", "version"] {
        assert!(stdout.contains(cmd), "help is missing {cmd}");
    }
}

#[test]
fn cli_version_command() {
    let (code, stdout, _stderr) = run_cli(&["version"], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("zeptorelay"));
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_unknown_command_fails() {
    let (code, _stdout, stderr) = run_cli(&["nonexistent"], None);
    assert_ne!(code, 0);
    assert!(stderr.contains("error"));
}

// ============================================================================
// Format
// ============================================================================

#[test]
fn cli_format_argument() {
    let dir = TempDir::new().unwrap();
    let cfg = missing_config(&dir);
    let (code, stdout, _stderr) = run_cli(
        &["--config", &cfg, "format", "--compact", "**bold** and ||secret||"],
        None,
    );
    assert_eq!(code, 0);
    let value: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(value["text"], "bold and secret");
    assert_eq!(value["entities"][0]["type"], "bold");
    assert_eq!(value["entities"][1]["type"], "spoiler");
    assert_eq!(value["entities"][1]["offset"], 9);
}

#[test]
fn cli_format_stdin_with_chunking() {
    let dir = TempDir::new().unwrap();
    let cfg = missing_config(&dir);
    let input = "first paragraph here\n\nsecond paragraph here";
    let (code, stdout, _stderr) = run_cli(
        &["--config", &cfg, "format", "--max-length", "25", "-"],
        Some(input),
    );
    assert_eq!(code, 0);
    let chunks: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0]["text"], "first paragraph here");
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn cli_config_prints_defaults() {
    let dir = TempDir::new().unwrap();
    let cfg = missing_config(&dir);
    let (code, stdout, _stderr) = run_cli(&["--config", &cfg, "config"], None);
    assert_eq!(code, 0);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["rate_limit"]["global_capacity"], 30);
    assert_eq!(value["queue"]["capacity"], 100);
}

#[test]
fn cli_config_check_ok() {
    let dir = TempDir::new().unwrap();
    let cfg = missing_config(&dir);
    let (code, stdout, _stderr) = run_cli(&["--config", &cfg, "config", "--check"], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("[OK]"));
    assert!(stdout.contains("looks good"));
}

#[test]
fn cli_config_check_rejects_invalid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"queue": {"capacity": 0}}"#).unwrap();
    let cfg = path.to_string_lossy().into_owned();
    let (code, stdout, _stderr) = run_cli(&["--config", &cfg, "config", "--check"], None);
    assert_ne!(code, 0);
    assert!(stdout.contains("[ERROR]"));
}

// ============================================================================
// Simulate
// ============================================================================

#[test]
fn cli_simulate_runs_a_turn() {
    let dir = TempDir::new().unwrap();
    let cfg = missing_config(&dir);
    let (code, stdout, _stderr) = run_cli(
        &["--config", &cfg, "simulate", "--steps", "2", "--delay-ms", "5"],
        None,
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("→ send"));
    assert!(stdout.contains("Summary"));
    assert!(stdout.contains("sent "));
}
