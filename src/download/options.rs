//! Per-request download configuration.
//!
//! Owned by the caller and read-only to the engine. Persistence belongs to
//! whoever produced it; `load` only reads.

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Video,
    Audio,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Video => "video",
            Mode::Audio => "audio",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality tier: selects which format ladder is eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// No height cap
    #[default]
    Best,
    /// Capped at 1080p
    High,
    /// Capped at 720p
    Medium,
    /// Capped at 480p
    Low,
}

impl QualityTier {
    /// Height ceiling for this tier, `None` for uncapped.
    pub fn max_height(&self) -> Option<u32> {
        match self {
            QualityTier::Best => None,
            QualityTier::High => Some(1080),
            QualityTier::Medium => Some(720),
            QualityTier::Low => Some(480),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Best => "best",
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }

    pub fn all() -> [QualityTier; 4] {
        [QualityTier::Best, QualityTier::High, QualityTier::Medium, QualityTier::Low]
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "best" => Ok(QualityTier::Best),
            "high" | "1080p" | "1080" => Ok(QualityTier::High),
            "medium" | "720p" | "720" => Ok(QualityTier::Medium),
            "low" | "480p" | "480" => Ok(QualityTier::Low),
            other => Err(AppError::Validation(format!("unknown quality tier '{}'", other))),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(config::expand_path(&config::DOWNLOAD_FOLDER))
}

fn default_naming_template() -> String {
    "%(title)s.%(ext)s".to_string()
}

fn default_concurrency() -> usize {
    config::queue::MAX_CONCURRENT_DOWNLOADS
}

/// Recognized per-request options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfiguration {
    pub mode: Mode,
    /// Container/codec of the final file: "mp4", "mkv" for video, "mp3", "m4a" for audio
    pub output_format: String,
    pub quality: QualityTier,
    #[serde(default = "default_true")]
    pub embed_metadata: bool,
    pub embed_subtitles: bool,
    /// Segment removal ("sponsor-skip"); only honored in video mode
    pub sponsor_skip: bool,
    /// Thumbnail embedding; off by default, known to break some encoders
    pub embed_thumbnail: bool,
    /// Pass `--geo-bypass` to the backend
    pub geo_bypass: bool,
    /// Queue playlist entries last-to-first
    pub reverse_playlist: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// `%(title)s`, `%(id)s` and `%(ext)s` placeholders are recognized
    #[serde(default = "default_naming_template")]
    pub naming_template: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DownloadConfiguration {
    fn default() -> Self {
        Self {
            mode: Mode::Video,
            output_format: "mp4".to_string(),
            quality: QualityTier::Best,
            embed_metadata: true,
            embed_subtitles: false,
            sponsor_skip: false,
            embed_thumbnail: false,
            geo_bypass: false,
            reverse_playlist: false,
            output_dir: default_output_dir(),
            naming_template: default_naming_template(),
            concurrency: default_concurrency(),
        }
    }
}

impl DownloadConfiguration {
    /// Default audio configuration (mp3).
    pub fn audio() -> Self {
        Self {
            mode: Mode::Audio,
            output_format: "mp3".to_string(),
            ..Self::default()
        }
    }

    /// Reads a configuration from a JSON settings file. Unknown fields are
    /// ignored and missing ones take their defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let raw = fs_err::read_to_string(path)?;
        let parsed: Self = serde_json::from_str(&raw)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.concurrency == 0 {
            return Err(AppError::Validation("concurrency must be at least 1".to_string()));
        }
        if self.output_format.trim().is_empty() {
            return Err(AppError::Validation("output format must not be empty".to_string()));
        }
        Ok(())
    }
}
