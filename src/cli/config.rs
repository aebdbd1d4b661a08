//! Config command handler.

use std::path::Path;

use anyhow::{bail, Result};

use zeptorelay::config::Config;

/// Print the effective configuration, or validate it with `check`.
pub(crate) fn cmd_config(
    path: Option<&Path>,
    loaded: zeptorelay::Result<Config>,
    check: bool,
) -> Result<()> {
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(Config::path);

    if !check {
        let config = loaded?;
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Config file: {}", config_path.display());
    if !config_path.exists() {
        println!("[OK] No config file found (using defaults)");
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("[ERROR] {}", e);
            bail!("configuration could not be loaded");
        }
    };

    match config.validate() {
        Ok(()) => {
            println!("\nConfiguration looks good!");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] {}", e);
            bail!("configuration is invalid");
        }
    }
}
