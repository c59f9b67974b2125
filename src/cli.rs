use crate::core::error::AppResult;
use crate::download::backend::ProgressUpdate;
use crate::download::engine::{AttemptOutcome, DownloadOutcome};
use crate::download::options::{DownloadConfiguration, Mode, QualityTier};
use crate::download::source::CookieSource;
use clap::{Args, Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ladder")]
#[command(author, version, about = "Fallback-driven media downloader built on yt-dlp", long_about = None)]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download one or more URLs
    Download(DownloadArgs),

    /// List the client strategies, in the order they are tried
    Strategies,

    /// Show the format ladder for a quality tier
    Ladder {
        /// best, high (1080p), medium (720p) or low (480p)
        #[arg(short, long, default_value = "best")]
        quality: QualityTier,

        /// Show the audio ladder instead
        #[arg(short, long)]
        audio: bool,
    },

    /// Check that yt-dlp, ffmpeg and a JS runtime are available
    Doctor,
}

#[derive(Args, Debug, Clone, Default)]
pub struct DownloadArgs {
    /// URLs to download
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Extract audio only
    #[arg(short, long)]
    pub audio: bool,

    /// Output format (mp4, mkv, mp3, m4a, ...)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Quality tier: best, high, medium, low
    #[arg(short, long)]
    pub quality: Option<QualityTier>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Do not embed metadata
    #[arg(long)]
    pub no_meta: bool,

    /// Embed the thumbnail
    #[arg(long)]
    pub thumb: bool,

    /// Embed subtitles (video only)
    #[arg(long)]
    pub subs: bool,

    /// Cut sponsor segments (video only)
    #[arg(long)]
    pub sponsor: bool,

    /// Parallel downloads
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Netscape-format cookies file
    #[arg(long)]
    pub cookies_file: Option<PathBuf>,

    /// Browser to read cookies from (chrome, firefox, ...)
    #[arg(long, conflicts_with = "cookies_file")]
    pub cookies_browser: Option<String>,

    /// Ask yt-dlp to fake its location for region-locked media
    #[arg(long)]
    pub geo: bool,

    /// Download playlist entries last-to-first
    #[arg(long)]
    pub reverse: bool,

    /// JSON settings file; flags given on the command line win
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl DownloadArgs {
    /// Settings file (or defaults) with the command-line flags applied.
    pub fn to_configuration(&self) -> AppResult<DownloadConfiguration> {
        let mut cfg = match &self.config {
            Some(path) => DownloadConfiguration::load(path)?,
            None => DownloadConfiguration::default(),
        };

        if self.audio && cfg.mode != Mode::Audio {
            cfg.mode = Mode::Audio;
            cfg.output_format = DownloadConfiguration::audio().output_format;
        }
        if let Some(format) = &self.format {
            cfg.output_format = format.trim().to_lowercase();
        }
        if let Some(quality) = self.quality {
            cfg.quality = quality;
        }
        if let Some(output) = &self.output {
            cfg.output_dir = output.clone();
        }
        if let Some(jobs) = self.jobs {
            cfg.concurrency = jobs;
        }
        if self.no_meta {
            cfg.embed_metadata = false;
        }
        cfg.embed_thumbnail |= self.thumb;
        cfg.embed_subtitles |= self.subs;
        cfg.sponsor_skip |= self.sponsor;
        cfg.geo_bypass |= self.geo;
        cfg.reverse_playlist |= self.reverse;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Flags first, then the environment.
    pub fn cookie_source(&self) -> CookieSource {
        if let Some(file) = &self.cookies_file {
            return CookieSource::File(file.clone());
        }
        if let Some(browser) = self.cookies_browser.as_deref().filter(|b| !b.trim().is_empty()) {
            return CookieSource::Browser(browser.trim().to_string());
        }
        CookieSource::from_env()
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

const BAR_WIDTH: usize = 20;

/// One-line progress bar: `[█████---------------] 25.0% | 1.5 MiB/s | ETA 0:42`.
/// `None` until yt-dlp reports a percentage.
pub fn render_progress(update: &ProgressUpdate) -> Option<String> {
    let percent = update.percent?.clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * BAR_WIDTH as f32).round() as usize;
    let mut line = format!(
        "[{}{}] {:5.1}%",
        "█".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        percent
    );

    if let Some(speed) = update.speed_bytes_sec {
        let _ = write!(line, " | {}/s", human_bytes(speed));
    }
    if let Some(eta) = update.eta_seconds {
        let _ = write!(line, " | ETA {}:{:02}", eta / 60, eta % 60);
    }
    Some(line)
}

fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes.max(0.0);
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

fn outcome_label(outcome: AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Success => "ok".to_string(),
        AttemptOutcome::Failed(kind) => kind.to_string(),
        AttemptOutcome::Aborted(kind) => format!("{} (aborted)", kind),
        AttemptOutcome::Cancelled => "cancelled".to_string(),
    }
}

/// Human-readable report of one request: the result line, then every
/// attempt that was made and why it ended.
pub fn render_outcome(reference: &str, outcome: &DownloadOutcome) -> String {
    let mut out = String::new();

    match outcome {
        DownloadOutcome::Success(success) => {
            let _ = writeln!(out, "✅ {} → {}", reference, success.path.display());
            let _ = writeln!(
                out,
                "   attempt {}: {} | {}",
                success.attempt, success.layer, success.strategy
            );
            if success.degraded() {
                let dropped: Vec<_> = success.removed_stages.iter().map(|s| s.as_str()).collect();
                let _ = writeln!(out, "   ⚠️ skipped postprocessing: {}", dropped.join(", "));
            }
        }
        DownloadOutcome::Cancelled { .. } => {
            let _ = writeln!(out, "⏹️ {}: cancelled", reference);
        }
        DownloadOutcome::Exhausted { .. } | DownloadOutcome::Aborted { .. } => {
            let message = outcome.error_kind().map(|k| k.user_message()).unwrap_or_default();
            let _ = writeln!(out, "❌ {}: {}", reference, message);
        }
    }

    if !outcome.is_success() || outcome.history().len() > 1 {
        for result in outcome.history() {
            let detail = result
                .diagnostic
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("");
            let _ = writeln!(
                out,
                "   #{:<2} {} | {} → {} {}",
                result.index,
                result.layer,
                result.strategy,
                outcome_label(result.outcome),
                detail
            );
        }
    }
    out
}
