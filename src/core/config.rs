//! Process-wide configuration constants.
//!
//! The engine never reads these directly: they seed the `Default` impls of
//! `EngineConfig` and `DownloadConfiguration`, which are then passed in
//! explicitly.

use once_cell::sync::Lazy;
use std::env;
use std::time::Duration;

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Directory (or binary path) handed to yt-dlp via `--ffmpeg-location`
/// Read from FFMPEG_LOCATION; unset means "whatever is on PATH"
pub static FFMPEG_LOCATION: Lazy<Option<String>> = Lazy::new(|| env::var("FFMPEG_LOCATION").ok());

/// Browser to extract cookies from
/// Read from YTDL_COOKIES_BROWSER environment variable
/// Supported: chrome, firefox, safari, brave, chromium, edge, opera, vivaldi
///
/// Default: empty (no browser extraction)
pub static YTDL_COOKIES_BROWSER: Lazy<String> =
    Lazy::new(|| env::var("YTDL_COOKIES_BROWSER").unwrap_or_else(|_| String::new()));

/// Path to a Netscape-format cookies file
/// Read from YTDL_COOKIES_FILE environment variable
/// If set, this takes priority over YTDL_COOKIES_BROWSER
pub static YTDL_COOKIES_FILE: Lazy<Option<String>> = Lazy::new(|| env::var("YTDL_COOKIES_FILE").ok());

/// Download folder path
/// Read from DOWNLOAD_FOLDER environment variable
/// Defaults to ./downloads; supports tilde (~) expansion
pub static DOWNLOAD_FOLDER: Lazy<String> =
    Lazy::new(|| env::var("DOWNLOAD_FOLDER").unwrap_or_else(|_| "./downloads".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: ladder.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "ladder.log".to_string()));

/// Expands `~` in a configured path.
pub fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).to_string()
}

/// Attempt planning configuration
pub mod engine {
    use super::Duration;

    /// Hard cap on attempts per request (5 layers x 4 strategies fits exactly)
    pub const MAX_ATTEMPTS: usize = 20;

    /// Randomized pause before the first attempt, lower bound (milliseconds)
    pub const START_JITTER_MIN_MS: u64 = 500;

    /// Randomized pause before the first attempt, upper bound (milliseconds)
    pub const START_JITTER_MAX_MS: u64 = 2000;

    /// Cooldowns at least this long hand the worker slot back to the pool
    pub const YIELD_SLOT_AFTER_SECS: u64 = 10;

    pub fn start_jitter() -> (Duration, Duration) {
        (
            Duration::from_millis(START_JITTER_MIN_MS),
            Duration::from_millis(START_JITTER_MAX_MS),
        )
    }

    pub fn yield_slot_after() -> Duration {
        Duration::from_secs(YIELD_SLOT_AFTER_SECS)
    }
}

/// Rate-limit cooldown curve
pub mod cooldown {
    use super::Duration;

    /// First cooldown after a rate-limit signal (seconds)
    pub const INITIAL_SECS: u64 = 15;

    /// Upper bound for a single cooldown (seconds)
    pub const MAX_SECS: u64 = 120;

    /// Multiplier applied per consecutive cooldown
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;

    /// Cooldown retries allowed for one request before the attempt is given up
    pub const MAX_COOLDOWNS: u32 = 4;

    pub fn initial() -> Duration {
        Duration::from_secs(INITIAL_SECS)
    }

    pub fn max() -> Duration {
        Duration::from_secs(MAX_SECS)
    }
}

/// Download configuration
pub mod download {
    use super::Duration;

    /// Timeout for a single yt-dlp invocation (in seconds)
    pub const YTDLP_TIMEOUT_SECS: u64 = 900; // 15 minutes, long videos + merge

    /// Timeout for metadata extraction (in seconds)
    pub const METADATA_TIMEOUT_SECS: u64 = 60;

    /// How long a killed subprocess gets to exit before we stop waiting (in seconds)
    pub const KILL_GRACE_SECS: u64 = 5;

    /// Lines of stderr kept for diagnostics
    pub const STDERR_TAIL_LINES: usize = 200;

    pub fn ytdlp_timeout() -> Duration {
        Duration::from_secs(YTDLP_TIMEOUT_SECS)
    }

    pub fn metadata_timeout() -> Duration {
        Duration::from_secs(METADATA_TIMEOUT_SECS)
    }

    pub fn kill_grace() -> Duration {
        Duration::from_secs(KILL_GRACE_SECS)
    }
}

/// Queue processing configuration
pub mod queue {
    use super::Duration;

    /// Default number of concurrent downloads
    /// Kept low to stay under the remote rate limiter
    pub const MAX_CONCURRENT_DOWNLOADS: usize = 2;

    /// Delay between starting queued requests (milliseconds)
    pub const INTER_DOWNLOAD_DELAY_MS: u64 = 2000;

    pub fn inter_download_delay() -> Duration {
        Duration::from_millis(INTER_DOWNLOAD_DELAY_MS)
    }
}
