//! Startup diagnostics: which external tools the backend can rely on.

use crate::core::config;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Capability report for the external toolchain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemReport {
    /// `yt-dlp --version` output, if the binary runs
    pub ytdlp: Option<String>,
    /// First line of `ffmpeg -version`, if the binary runs
    pub ffmpeg: Option<String>,
    /// Name of the first JS runtime found (deno preferred over node)
    pub js_runtime: Option<String>,
}

impl SystemReport {
    /// Names of missing tools that make downloads fail or degrade badly.
    pub fn missing_criticals(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.ytdlp.is_none() {
            missing.push("yt-dlp");
        }
        if self.ffmpeg.is_none() {
            missing.push("FFmpeg");
        }
        if self.js_runtime.is_none() {
            missing.push("JS Runtime (Deno/Node.js)");
        }
        missing
    }

    pub fn is_healthy(&self) -> bool {
        self.missing_criticals().is_empty()
    }
}

/// Runs the version probes.
pub struct SystemDoctor {
    ytdlp_bin: String,
    ffmpeg_bin: String,
}

impl Default for SystemDoctor {
    fn default() -> Self {
        let ffmpeg_bin = match config::FFMPEG_LOCATION.as_deref() {
            Some(location) if location.ends_with("ffmpeg") || location.ends_with("ffmpeg.exe") => location.to_string(),
            Some(dir) => std::path::Path::new(dir).join("ffmpeg").to_string_lossy().to_string(),
            None => "ffmpeg".to_string(),
        };
        Self {
            ytdlp_bin: config::YTDL_BIN.clone(),
            ffmpeg_bin,
        }
    }
}

impl SystemDoctor {
    pub fn new(ytdlp_bin: impl Into<String>, ffmpeg_bin: impl Into<String>) -> Self {
        Self {
            ytdlp_bin: ytdlp_bin.into(),
            ffmpeg_bin: ffmpeg_bin.into(),
        }
    }

    pub async fn run_diagnostics(&self) -> SystemReport {
        let ytdlp = probe_version(&self.ytdlp_bin, "--version").await;
        let ffmpeg = probe_version(&self.ffmpeg_bin, "-version").await;

        let js_runtime = if probe_version("deno", "--version").await.is_some() {
            Some("deno".to_string())
        } else if probe_version("node", "--version").await.is_some() {
            Some("node".to_string())
        } else {
            None
        };

        let report = SystemReport {
            ytdlp,
            ffmpeg,
            js_runtime,
        };

        let missing = report.missing_criticals();
        if missing.is_empty() {
            log::info!("System check passed: {:?}", report);
        } else {
            log::warn!("Missing criticals: {}", missing.join(", "));
        }

        report
    }
}

/// Runs `<bin> <flag>` and returns the first stdout line on success.
async fn probe_version(bin: &str, flag: &str) -> Option<String> {
    let output = timeout(VERSION_CHECK_TIMEOUT, Command::new(bin).arg(flag).output())
        .await
        .ok()?
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
}
