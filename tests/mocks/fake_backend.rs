//! Scripted backend for engine and queue tests
//!
//! Each `fetch_and_encode` call consumes the next scripted step; once the
//! script runs out, the fallback step is used for every further call. All
//! calls are recorded so tests can assert on what the engine asked for.

#![allow(dead_code)]

use async_trait::async_trait;
use ladder_dl::download::{
    list_strategies, BackendFailure, FetchJob, MediaBackend, Metadata, PostprocessorChain, ProgressCallback,
    ProgressUpdate,
};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What one backend invocation does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write a file whose content lists the stages that ran
    Succeed,
    /// Report success without producing a usable file
    SucceedEmpty,
    Fail(BackendFailure),
    /// Block until the job's cancellation token fires
    WaitForCancel,
    /// Never return; only the engine's own cancellation can stop it
    Hang,
    /// Sleep, then succeed
    Slow(Duration),
}

impl Step {
    pub fn format_unavailable() -> Self {
        Step::Fail(BackendFailure::new(
            Some(1),
            "ERROR: [youtube] abc: Requested format is not available. Use --list-formats",
        ))
    }

    pub fn rate_limited() -> Self {
        Step::Fail(BackendFailure::new(Some(1), "ERROR: [youtube] abc: HTTP Error 429: Too Many Requests"))
    }

    pub fn auth_required() -> Self {
        Step::Fail(BackendFailure::new(
            Some(1),
            "ERROR: [youtube] abc: Sign in to confirm you're not a bot. Use --cookies-from-browser or --cookies",
        ))
    }

    /// Encoder failure while the given postprocessor tag was running.
    pub fn encoder_failure(tag: &str) -> Self {
        Step::Fail(BackendFailure::new(
            Some(-22),
            format!("[Merger] Merging formats into \"abc.mp4\"\n{} Processing \"abc.mp4\"\nERROR: Postprocessing: Conversion failed!", tag),
        ))
    }

    pub fn unknown() -> Self {
        Step::Fail(BackendFailure::new(Some(2), "Segmentation fault"))
    }
}

/// One recorded `fetch_and_encode` call.
#[derive(Debug, Clone)]
pub struct Call {
    pub selector: String,
    pub strategy: &'static str,
    pub chain: PostprocessorChain,
    pub output_format: String,
    pub reference: String,
    pub geo_bypass: bool,
}

pub struct FakeBackend {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    metadata: Mutex<VecDeque<Result<Metadata, BackendFailure>>>,
    listings: Mutex<VecDeque<Result<Vec<String>, BackendFailure>>>,
    calls: Mutex<Vec<Call>>,
    metadata_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeBackend {
    /// Script followed by "format unavailable" forever.
    pub fn scripted(steps: Vec<Step>) -> Self {
        Self::with_fallback(steps, Step::format_unavailable())
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback,
            metadata: Mutex::new(VecDeque::new()),
            listings: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            metadata_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(step: Step) -> Self {
        Self::with_fallback(Vec::new(), step)
    }

    /// Scripted metadata results; default is a fixed title.
    pub fn with_metadata(self, results: Vec<Result<Metadata, BackendFailure>>) -> Self {
        *self.metadata.lock().unwrap() = results.into();
        self
    }

    /// Scripted playlist listings, one per `list_entries` call; default
    /// lists the reference alone.
    pub fn with_listings(self, results: Vec<Result<Vec<String>, BackendFailure>>) -> Self {
        *self.listings.lock().unwrap() = results.into();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `fetch_and_encode` calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn strategy_name(options: &BTreeMap<&'static str, &'static str>) -> &'static str {
        list_strategies()
            .into_iter()
            .find(|s| &s.options == options)
            .map(|s| s.name)
            .unwrap_or("custom")
    }
}

pub fn default_metadata() -> Metadata {
    Metadata {
        id: "abc".to_string(),
        title: "Test Clip".to_string(),
        uploader: Some("Uploader".to_string()),
        duration_secs: Some(42),
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn extract_metadata(
        &self,
        _reference: &str,
        _strategy_options: &BTreeMap<&'static str, &'static str>,
    ) -> Result<Metadata, BackendFailure> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.metadata.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(default_metadata()))
    }

    async fn list_entries(
        &self,
        reference: &str,
        _strategy_options: &BTreeMap<&'static str, &'static str>,
    ) -> Result<Vec<String>, BackendFailure> {
        let next = self.listings.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(vec![reference.to_string()]))
    }

    async fn fetch_and_encode(
        &self,
        job: &FetchJob<'_>,
        progress: Option<&ProgressCallback>,
    ) -> Result<PathBuf, BackendFailure> {
        self.calls.lock().unwrap().push(Call {
            selector: job.format_selector.to_string(),
            strategy: Self::strategy_name(job.strategy_options),
            chain: job.chain.clone(),
            output_format: job.output_format.to_string(),
            reference: job.reference.to_string(),
            geo_bypass: job.geo_bypass,
        });
        let step = self.script.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match step {
            Step::Succeed | Step::Slow(_) => {
                if let Step::Slow(delay) = step {
                    tokio::time::sleep(delay).await;
                }
                if let Some(cb) = progress {
                    cb(&ProgressUpdate {
                        percent: Some(100.0),
                        ..ProgressUpdate::default()
                    });
                }
                let path = job.staging_dir.join(format!("abc.{}", job.output_format));
                std::fs::write(&path, job.chain.to_string()).unwrap();
                Ok(path)
            }
            Step::SucceedEmpty => {
                let path = job.staging_dir.join(format!("abc.{}", job.output_format));
                std::fs::write(&path, b"").unwrap();
                Ok(path)
            }
            Step::Fail(failure) => Err(failure),
            Step::WaitForCancel => {
                job.cancel.cancelled().await;
                Err(BackendFailure::cancelled())
            }
            Step::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
