//! Logging initialization and configuration checking
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Cookies configuration logging at startup

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `level` - Minimum level for both outputs
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to create the file or a logger is already set
pub fn init_logger(log_file_path: &str, level: LevelFilter) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs which cookie source (if any) will be handed to the backend.
pub fn log_cookies_configuration() {
    if let Some(ref cookies_file) = *config::YTDL_COOKIES_FILE {
        let path = config::expand_path(cookies_file);
        if std::path::Path::new(&path).exists() {
            log::info!("🍪 YTDL_COOKIES_FILE: {}", path);
        } else {
            log::error!("❌ YTDL_COOKIES_FILE: {} (FILE NOT FOUND)", path);
        }
        return;
    }

    let browser = config::YTDL_COOKIES_BROWSER.as_str();
    if !browser.is_empty() {
        log::info!("🍪 YTDL_COOKIES_BROWSER: {}", browser);
    } else {
        log::info!("🍪 No cookies configured, age-restricted or members-only media will abort");
    }
}
