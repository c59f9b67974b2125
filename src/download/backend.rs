//! Extraction/encoding backend capability.
//!
//! The engine treats the backend as opaque: it asks for metadata, then asks
//! it to fetch + encode one (selector, strategy, chain) combination into a
//! staging directory. All retry logic lives above this trait.

use crate::download::postprocess::PostprocessorChain;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Raw failure signal from one backend invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendFailure {
    /// Subprocess exit code, when there was a subprocess
    pub exit_code: Option<i32>,
    /// Diagnostic text (exception message or stderr tail)
    pub message: String,
    /// The invocation was interrupted by cancellation
    pub cancelled: bool,
}

impl BackendFailure {
    pub fn new(exit_code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
            cancelled: false,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            exit_code: None,
            message: "cancelled".to_string(),
            cancelled: true,
        }
    }
}

/// Media metadata used for naming the final file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration_secs: Option<u64>,
}

impl Metadata {
    /// Fallback when every strategy failed to resolve metadata: derive a
    /// stable name from the reference itself.
    pub fn from_reference(reference: &str) -> Self {
        let id = reference
            .split(['=', '/', '?', '&'])
            .filter(|part| !part.is_empty())
            .last()
            .unwrap_or("download")
            .to_string();
        Self {
            title: id.clone(),
            id,
            uploader: None,
            duration_secs: None,
        }
    }
}

/// Periodic progress from the active invocation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressUpdate {
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub speed_bytes_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub percent: Option<f32>,
}

/// Caller-supplied progress callback.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Everything one backend invocation needs.
#[derive(Debug, Clone)]
pub struct FetchJob<'a> {
    pub reference: &'a str,
    pub format_selector: &'a str,
    pub strategy_options: &'a BTreeMap<&'static str, &'static str>,
    pub chain: &'a PostprocessorChain,
    /// Target container/codec ("mp4", "mp3", ...)
    pub output_format: &'a str,
    /// Private directory for this request; nothing outside it is written
    pub staging_dir: &'a Path,
    /// Ask the backend to fake its location when the media is region-locked
    pub geo_bypass: bool,
    pub cancel: &'a CancellationToken,
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Human-readable name (e.g. "yt-dlp")
    fn name(&self) -> &str;

    /// Resolve metadata for a reference using the given strategy's options.
    async fn extract_metadata(
        &self,
        reference: &str,
        strategy_options: &BTreeMap<&'static str, &'static str>,
    ) -> Result<Metadata, BackendFailure>;

    /// References behind `reference`: one per entry for a playlist, the
    /// reference itself for a single item.
    async fn list_entries(
        &self,
        reference: &str,
        _strategy_options: &BTreeMap<&'static str, &'static str>,
    ) -> Result<Vec<String>, BackendFailure> {
        Ok(vec![reference.to_string()])
    }

    /// Fetch and encode into `job.staging_dir`, returning the produced file.
    async fn fetch_and_encode(
        &self,
        job: &FetchJob<'_>,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf, BackendFailure>;
}
