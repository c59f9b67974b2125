//! Concrete `MediaBackend` implementations.
//!
//! - `YtDlpBackend`: yt-dlp subprocess (1000+ sites), ffmpeg for postprocessing

pub mod ytdlp;

pub use ytdlp::{CookieSource, YtDlpBackend};
