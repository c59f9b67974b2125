//! yt-dlp subprocess backend.
//!
//! One `fetch_and_encode` call is one yt-dlp run: the engine picks the
//! selector, strategy and chain, this module only turns them into arguments,
//! streams progress, and reports the exit code plus the tail of the output
//! when the run fails. No retries happen here.

use crate::core::config;
use crate::download::backend::{BackendFailure, FetchJob, MediaBackend, Metadata, ProgressCallback};
use crate::download::postprocess::{PostprocessorChain, PostprocessorStage};
use crate::download::progress::parse_progress;
use crate::download::strategies::EXTRACTOR_ARGS;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where yt-dlp gets cookies from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CookieSource {
    #[default]
    None,
    /// Netscape-format cookies file (`--cookies`)
    File(PathBuf),
    /// Browser profile (`--cookies-from-browser`)
    Browser(String),
}

impl CookieSource {
    /// From `YTDL_COOKIES_FILE` (preferred) or `YTDL_COOKIES_BROWSER`.
    pub fn from_env() -> Self {
        if let Some(file) = config::YTDL_COOKIES_FILE.as_deref().filter(|f| !f.trim().is_empty()) {
            return CookieSource::File(PathBuf::from(config::expand_path(file)));
        }
        let browser = config::YTDL_COOKIES_BROWSER.trim();
        if browser.is_empty() {
            CookieSource::None
        } else {
            CookieSource::Browser(browser.to_string())
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            CookieSource::None => Vec::new(),
            CookieSource::File(path) => vec!["--cookies".to_string(), path.display().to_string()],
            CookieSource::Browser(browser) => vec!["--cookies-from-browser".to_string(), browser.clone()],
        }
    }
}

/// Subset of `--dump-single-json` output used for naming.
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl From<InfoJson> for Metadata {
    fn from(info: InfoJson) -> Self {
        Metadata {
            title: info.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| info.id.clone()),
            id: info.id,
            uploader: info.uploader.or(info.channel),
            duration_secs: info.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
        }
    }
}

/// Captured result of one successful run.
struct RunOutput {
    stdout: String,
}

enum Wait {
    Exited(std::io::Result<std::process::ExitStatus>),
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct YtDlpBackend {
    ytdl_bin: String,
    ffmpeg_location: Option<String>,
    cookies: CookieSource,
    timeout: Duration,
    metadata_timeout: Duration,
}

impl Default for YtDlpBackend {
    fn default() -> Self {
        Self {
            ytdl_bin: config::YTDL_BIN.clone(),
            ffmpeg_location: config::FFMPEG_LOCATION.clone(),
            cookies: CookieSource::from_env(),
            timeout: config::download::ytdlp_timeout(),
            metadata_timeout: config::download::metadata_timeout(),
        }
    }
}

impl YtDlpBackend {
    pub fn new(ytdl_bin: impl Into<String>) -> Self {
        Self {
            ytdl_bin: ytdl_bin.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: CookieSource) -> Self {
        self.cookies = cookies;
        self
    }

    #[must_use]
    pub fn with_ffmpeg_location(mut self, location: Option<String>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn common_args(&self, strategy_options: &BTreeMap<&'static str, &'static str>) -> Vec<String> {
        let mut args = strategy_args(strategy_options);
        args.extend(self.cookies.args());
        args
    }

    /// Arguments for a metadata-only run.
    pub fn build_metadata_args(&self, reference: &str, strategy_options: &BTreeMap<&'static str, &'static str>) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.common_args(strategy_options));
        args.push("--".to_string());
        args.push(reference.to_string());
        args
    }

    /// Arguments for listing a playlist without resolving each entry.
    pub fn build_listing_args(&self, reference: &str, strategy_options: &BTreeMap<&'static str, &'static str>) -> Vec<String> {
        let mut args = vec![
            "--flat-playlist".to_string(),
            "--dump-single-json".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.common_args(strategy_options));
        args.push("--".to_string());
        args.push(reference.to_string());
        args
    }

    /// Arguments for one fetch + encode run.
    pub fn build_fetch_args(&self, job: &FetchJob<'_>) -> Vec<String> {
        let mut args = vec!["-f".to_string(), job.format_selector.to_string()];
        args.extend(self.common_args(job.strategy_options));
        args.extend(chain_args(job.chain, job.output_format));
        if job.geo_bypass {
            args.push("--geo-bypass".to_string());
        }

        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(location.clone());
        }

        let template = job.staging_dir.join("%(id)s.%(ext)s");
        args.extend([
            "-o".to_string(),
            template.display().to_string(),
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "--force-overwrites".to_string(),
            "--concurrent-fragments".to_string(),
            "1".to_string(),
            "--fragment-retries".to_string(),
            "10".to_string(),
            "--socket-timeout".to_string(),
            "30".to_string(),
            "--".to_string(),
            job.reference.to_string(),
        ]);
        args
    }

    /// Spawns yt-dlp and waits for it, racing cancellation and the timeout.
    /// Both stdout and stderr feed the diagnostic tail, since postprocessor
    /// tags appear on stdout and errors on stderr.
    async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
        timeout: Duration,
        progress: Option<ProgressCallback>,
        keep_stdout: bool,
    ) -> Result<RunOutput, BackendFailure> {
        log::debug!("{} {}", self.ytdl_bin, args.join(" "));

        let mut child = Command::new(&self.ytdl_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                log::error!("Failed to spawn {}: {}", self.ytdl_bin, e);
                BackendFailure::new(None, format!("Failed to spawn {}: {}", self.ytdl_bin, e))
            })?;

        let tail = Arc::new(Mutex::new(VecDeque::<String>::new()));
        let stdout_reader = child
            .stdout
            .take()
            .map(|s| spawn_reader(s, Arc::clone(&tail), progress.clone(), keep_stdout));
        let stderr_reader = child
            .stderr
            .take()
            .map(|s| spawn_reader(s, Arc::clone(&tail), None, false));

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => Wait::Cancelled,
            _ = tokio::time::sleep(timeout) => Wait::TimedOut,
            status = child.wait() => Wait::Exited(status),
        };

        let status = match waited {
            Wait::Exited(Ok(status)) => status,
            Wait::Exited(Err(e)) => {
                return Err(BackendFailure::new(None, format!("yt-dlp process failed: {}", e)));
            }
            Wait::Cancelled => {
                log::info!("Cancelling yt-dlp (pid {:?})", child.id());
                kill(&mut child).await;
                return Err(BackendFailure::cancelled());
            }
            Wait::TimedOut => {
                log::error!("yt-dlp process timed out after {}s, killing", timeout.as_secs());
                kill(&mut child).await;
                return Err(BackendFailure::new(
                    None,
                    format!("yt-dlp process timed out after {}s", timeout.as_secs()),
                ));
            }
        };

        let stdout = match stdout_reader {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if let Some(handle) = stderr_reader {
            let _ = handle.await;
        }

        if status.success() {
            return Ok(RunOutput { stdout });
        }

        let text = tail.lock().map(|mut lines| lines.make_contiguous().join("\n")).unwrap_or_default();
        Err(BackendFailure::new(status.code(), text))
    }
}

/// Kills the child and waits a bounded time for it to exit.
async fn kill(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        log::warn!("Failed to kill yt-dlp: {}", e);
        return;
    }
    if tokio::time::timeout(config::download::kill_grace(), child.wait()).await.is_err() {
        log::warn!("yt-dlp did not exit within {:?} after kill", config::download::kill_grace());
    }
}

/// Reads lines into the shared tail, reporting progress; returns the full
/// text if `keep` is set.
fn spawn_reader<R>(
    stream: R,
    tail: Arc<Mutex<VecDeque<String>>>,
    progress: Option<ProgressCallback>,
    keep: bool,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut kept = String::new();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(update) = parse_progress(&line) {
                if let Some(cb) = &progress {
                    cb(&update);
                }
                continue;
            }
            log::trace!("yt-dlp: {}", line);
            if keep {
                kept.push_str(&line);
                kept.push('\n');
            } else if let Ok(mut tail) = tail.lock() {
                tail.push_back(line);
                if tail.len() > config::download::STDERR_TAIL_LINES {
                    tail.pop_front();
                }
            }
        }
        kept
    })
}

/// Strategy options as yt-dlp flags. Unknown keys map to `--key-with-dashes`.
fn strategy_args(options: &BTreeMap<&'static str, &'static str>) -> Vec<String> {
    options
        .iter()
        .flat_map(|(key, value)| {
            let flag = if *key == EXTRACTOR_ARGS {
                "--extractor-args".to_string()
            } else {
                format!("--{}", key.replace('_', "-"))
            };
            [flag, (*value).to_string()]
        })
        .collect()
}

/// Postprocessor flags, in chain order.
fn chain_args(chain: &PostprocessorChain, output_format: &str) -> Vec<String> {
    let mut args = Vec::new();
    for stage in chain.stages() {
        match stage {
            PostprocessorStage::SegmentRemoval => {
                args.extend(["--sponsorblock-remove".to_string(), "sponsor".to_string()]);
            }
            PostprocessorStage::StreamMerge => {
                args.extend(["--merge-output-format".to_string(), output_format.to_string()]);
            }
            PostprocessorStage::SubtitleEmbed => {
                args.extend([
                    "--write-subs".to_string(),
                    "--sub-langs".to_string(),
                    "all,-live_chat".to_string(),
                    "--embed-subs".to_string(),
                ]);
            }
            PostprocessorStage::AudioExtraction => {
                args.extend([
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    output_format.to_string(),
                    "--audio-quality".to_string(),
                    "0".to_string(),
                ]);
            }
            PostprocessorStage::ThumbnailEmbed => args.push("--embed-thumbnail".to_string()),
            PostprocessorStage::MetadataEmbed => args.push("--embed-metadata".to_string()),
        }
    }
    args
}

/// Largest finished file in the staging directory.
async fn find_output(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(PathBuf, u64)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.')
            || [".part", ".ytdl", ".temp", ".json", ".vtt", ".srt", ".webp", ".jpg", ".png"]
                .iter()
                .any(|ext| name.ends_with(ext))
        {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() && best.as_ref().is_none_or(|(_, size)| meta.len() > *size) {
            best = Some((path, meta.len()));
        }
    }
    best.map(|(path, _)| path)
}

#[derive(Debug, Deserialize)]
struct ListingJson {
    #[serde(default)]
    entries: Option<Vec<Option<ListingEntry>>>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    url: Option<String>,
    webpage_url: Option<String>,
    id: Option<String>,
}

/// Entry references of a flat playlist listing, or the reference alone
/// when the listing is a single item.
fn parse_entries(json: &str, reference: &str) -> Result<Vec<String>, BackendFailure> {
    let listing: ListingJson = serde_json::from_str(json)
        .map_err(|e| BackendFailure::new(None, format!("unparseable playlist JSON: {}", e)))?;

    let Some(entries) = listing.entries else {
        return Ok(vec![reference.to_string()]);
    };

    let mut references = Vec::with_capacity(entries.len());
    for entry in entries.into_iter().flatten() {
        match entry.webpage_url.or(entry.url) {
            Some(url) => references.push(url),
            None => log::warn!("Skipping playlist entry {:?} of {} with no URL", entry.id, reference),
        }
    }
    Ok(references)
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn extract_metadata(
        &self,
        reference: &str,
        strategy_options: &BTreeMap<&'static str, &'static str>,
    ) -> Result<Metadata, BackendFailure> {
        let args = self.build_metadata_args(reference, strategy_options);
        // Cancellation drops this future, and kill_on_drop takes the child with it
        let output = self
            .run(&args, &CancellationToken::new(), self.metadata_timeout, None, true)
            .await?;

        let info: InfoJson = serde_json::from_str(output.stdout.trim())
            .map_err(|e| BackendFailure::new(None, format!("unparseable metadata JSON: {}", e)))?;
        Ok(info.into())
    }

    async fn list_entries(
        &self,
        reference: &str,
        strategy_options: &BTreeMap<&'static str, &'static str>,
    ) -> Result<Vec<String>, BackendFailure> {
        let args = self.build_listing_args(reference, strategy_options);
        let output = self
            .run(&args, &CancellationToken::new(), self.metadata_timeout, None, true)
            .await?;
        parse_entries(output.stdout.trim(), reference)
    }

    async fn fetch_and_encode(
        &self,
        job: &FetchJob<'_>,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf, BackendFailure> {
        let args = self.build_fetch_args(job);
        self.run(&args, job.cancel, self.timeout, progress.cloned(), false).await?;

        find_output(job.staging_dir)
            .await
            .ok_or_else(|| BackendFailure::new(Some(0), "yt-dlp exited cleanly but produced no output file"))
    }
}
