//! Attempt orchestrator.
//!
//! One `download` call drives one request through
//! `Planning → Attempting → (degraded | cooling | advancing) → … → terminal`.
//! Attempts are strictly serial and the attempt index never goes backwards.
//!
//! - Encoder failure: drop one postprocessor stage, re-invoke the same attempt
//! - Rate limit: cool down (bounded curve, bounded count), re-invoke
//! - Format unavailable / unknown: advance to the next attempt
//! - Auth required: abort the whole request

use crate::core::config;
use crate::core::retry::RetryConfig;
use crate::download::backend::{BackendFailure, FetchJob, MediaBackend, Metadata, ProgressCallback};
use crate::download::events::{EngineEvent, EventSink, RetryReason, TextEventSink};
use crate::download::formats::{layers_for, FormatLayer};
use crate::download::options::DownloadConfiguration;
use crate::download::output::{is_valid_output, DestinationLocks, StagingArea};
use crate::download::planner::{plan, Attempt};
use crate::download::postprocess::{self, PostprocessorChain, PostprocessorStage};
use crate::download::queue::WorkerSlot;
use crate::download::strategies::{list_strategies, Strategy};
use crate::download::ytdlp_errors::{Classifier, ErrorKind};
use async_trait::async_trait;
use rand::RngExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Non-busy wait used for cooldowns and start jitter. Swapped for a fake
/// clock in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Engine tuning. Built from `core::config` by default; the engine itself
/// never reads process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Cap on attempts per request
    pub max_attempts: usize,
    /// Rate-limit cooldown curve; `max_retries` caps cooldowns per request
    pub cooldown: RetryConfig,
    /// Random delay before the first attempt, `None` to start immediately
    pub start_jitter: Option<(Duration, Duration)>,
    /// Cooldowns at least this long give the worker slot back while waiting
    pub yield_slot_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: config::engine::MAX_ATTEMPTS,
            cooldown: RetryConfig::rate_limit(),
            start_jitter: Some(config::engine::start_jitter()),
            yield_slot_after: config::engine::yield_slot_after(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn max_attempts(mut self, max: usize) -> Self {
        self.max_attempts = max;
        self
    }

    #[must_use]
    pub fn cooldown(mut self, cooldown: RetryConfig) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn no_start_jitter(mut self) -> Self {
        self.start_jitter = None;
        self
    }
}

/// Final state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Advanced past this attempt
    Failed(ErrorKind),
    /// Stopped the whole request
    Aborted(ErrorKind),
    Cancelled,
}

/// History entry: one per attempt, whatever number of invocations it took.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub index: usize,
    pub layer: String,
    pub strategy: String,
    pub outcome: AttemptOutcome,
    /// Raw backend diagnostic of the last invocation (empty on success)
    pub diagnostic: String,
    /// Backend invocations spent on this attempt (degraded and cooldown
    /// retries included)
    pub invocations: u32,
    /// Stages dropped while on this attempt
    pub removed_stages: Vec<PostprocessorStage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSuccess {
    pub path: PathBuf,
    /// Index of the attempt that succeeded
    pub attempt: usize,
    pub layer: String,
    pub strategy: String,
    /// Stages dropped over the whole request; empty means the full chain ran
    pub removed_stages: Vec<PostprocessorStage>,
    pub history: Vec<AttemptResult>,
}

impl DownloadSuccess {
    pub fn degraded(&self) -> bool {
        !self.removed_stages.is_empty()
    }
}

/// Terminal result of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Success(DownloadSuccess),
    /// Every planned attempt failed
    Exhausted { history: Vec<AttemptResult> },
    /// A non-retryable failure stopped the request
    Aborted {
        kind: ErrorKind,
        detail: String,
        history: Vec<AttemptResult>,
    },
    Cancelled { history: Vec<AttemptResult> },
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            DownloadOutcome::Success(s) => Some(&s.path),
            _ => None,
        }
    }

    pub fn history(&self) -> &[AttemptResult] {
        match self {
            DownloadOutcome::Success(s) => &s.history,
            DownloadOutcome::Exhausted { history }
            | DownloadOutcome::Aborted { history, .. }
            | DownloadOutcome::Cancelled { history } => history,
        }
    }

    /// Error kind that ended the request, if it failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            DownloadOutcome::Success(_) | DownloadOutcome::Cancelled { .. } => None,
            DownloadOutcome::Aborted { kind, .. } => Some(*kind),
            DownloadOutcome::Exhausted { history } => Some(final_kind(history)),
        }
    }
}

fn final_kind(history: &[AttemptResult]) -> ErrorKind {
    match history.last().map(|r| r.outcome) {
        Some(AttemptOutcome::Failed(kind)) | Some(AttemptOutcome::Aborted(kind)) => kind,
        _ => ErrorKind::Unknown,
    }
}

/// Per-request inputs supplied by the caller.
#[derive(Default)]
pub struct DownloadContext {
    pub cancel: CancellationToken,
    /// Worker-pool slot held while this request runs
    pub slot: Option<WorkerSlot>,
    pub progress: Option<ProgressCallback>,
    /// Defaults to `TextEventSink`
    pub events: Option<Arc<dyn EventSink>>,
}

impl DownloadContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_slot(mut self, slot: WorkerSlot) -> Self {
        self.slot = Some(slot);
        self
    }
}

/// How one backend invocation ended, after output validation.
enum Invocation {
    Produced(PathBuf),
    Failed(BackendFailure),
    Cancelled,
}

/// What to do after a failed invocation.
enum Next {
    RetrySame,
    Advance(ErrorKind),
    Abort(ErrorKind),
    Cancel,
}

/// Mutable state of one request.
struct Request<'a> {
    reference: &'a str,
    config: &'a DownloadConfiguration,
    events: Arc<dyn EventSink>,
    ctx: DownloadContext,
    chain: PostprocessorChain,
    removed: Vec<PostprocessorStage>,
    cooldowns_used: u32,
    history: Vec<AttemptResult>,
}

impl Request<'_> {
    fn emit(&self, event: EngineEvent) {
        self.events.emit(self.reference, &event);
    }

    fn record(&mut self, attempt: &Attempt, outcome: AttemptOutcome, diagnostic: String, invocations: u32, removed: Vec<PostprocessorStage>) {
        self.history.push(AttemptResult {
            index: attempt.index,
            layer: attempt.layer.label.clone(),
            strategy: attempt.strategy.name.to_string(),
            outcome,
            diagnostic,
            invocations,
            removed_stages: removed,
        });
    }
}

pub struct Engine {
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    strategies: Vec<Strategy>,
    layers: Option<Vec<FormatLayer>>,
    classifier: Classifier,
    sleeper: Arc<dyn Sleeper>,
    locks: Arc<DestinationLocks>,
}

impl Engine {
    pub fn new(backend: Arc<dyn MediaBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            strategies: list_strategies(),
            layers: None,
            classifier: Classifier::default(),
            sleeper: Arc::new(TokioSleeper),
            locks: Arc::new(DestinationLocks::new()),
        }
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replaces the strategy catalog.
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Fixed format ladder instead of the one derived from mode and quality.
    #[must_use]
    pub fn with_layers(mut self, layers: Vec<FormatLayer>) -> Self {
        self.layers = Some(layers);
        self
    }

    /// Shares destination locks with other engines writing to the same
    /// directories.
    #[must_use]
    pub fn with_destination_locks(mut self, locks: Arc<DestinationLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Plans the attempts a request with this configuration would make.
    pub fn plan_for(&self, config: &DownloadConfiguration) -> Vec<Attempt> {
        let layers = match &self.layers {
            Some(layers) => layers.clone(),
            None => layers_for(config.mode, config.quality),
        };
        plan(&layers, &self.strategies, self.config.max_attempts)
    }

    /// Expands a reference into the items to download: every entry of a
    /// playlist, or the reference alone. Strategies are tried in catalog
    /// order; if none can list the reference it is returned unchanged and
    /// the download itself reports the failure. Empty if cancelled.
    pub async fn expand_reference(&self, reference: &str, cancel: &CancellationToken) -> Vec<String> {
        for strategy in &self.strategies {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Vec::new(),
                result = self.backend.list_entries(reference, &strategy.options) => result,
            };

            match result {
                Ok(entries) if !entries.is_empty() => {
                    if entries.len() > 1 {
                        log::info!("{} expands to {} entries via {}", reference, entries.len(), strategy.name);
                    }
                    return entries;
                }
                Ok(_) => log::warn!("{} lists no entries via {}", reference, strategy.name),
                Err(failure) if failure.cancelled => return Vec::new(),
                Err(failure) => {
                    let kind = self.classifier.classify(&failure).kind;
                    if kind == ErrorKind::AuthRequired {
                        break;
                    }
                    log::warn!("Listing {} via {} failed ({}), trying next strategy", reference, strategy.name, kind);
                }
            }
        }
        vec![reference.to_string()]
    }

    /// Runs one request to a terminal state.
    pub async fn download(&self, reference: &str, config: &DownloadConfiguration, ctx: DownloadContext) -> DownloadOutcome {
        let events: Arc<dyn EventSink> = match &ctx.events {
            Some(events) => Arc::clone(events),
            None => Arc::new(TextEventSink),
        };

        // Planning
        let built = postprocess::build(config);
        let attempts = self.plan_for(config);
        let mut req = Request {
            reference,
            config,
            events,
            ctx,
            chain: built.chain,
            removed: Vec::new(),
            cooldowns_used: 0,
            history: Vec::with_capacity(attempts.len()),
        };
        for o in built.overrides {
            req.emit(EngineEvent::ConfigOverride {
                setting: o.setting,
                reason: o.reason,
            });
        }
        log::debug!(
            "Planned {} attempts for {} (chain: {})",
            attempts.len(),
            reference,
            req.chain
        );

        if attempts.is_empty() {
            let detail = "no format layer or strategy to try".to_string();
            req.emit(EngineEvent::Failed {
                index: None,
                kind: ErrorKind::Unknown,
                detail,
            });
            return DownloadOutcome::Exhausted { history: req.history };
        }

        if let Some((min, max)) = self.config.start_jitter {
            let delay = jitter_between(min, max);
            if !delay.is_zero() && !self.pause(delay, &req.ctx.cancel).await {
                return DownloadOutcome::Cancelled { history: req.history };
            }
        }

        let metadata = match self.resolve_metadata(reference, &req.ctx.cancel).await {
            Ok(metadata) => metadata,
            Err(None) => return DownloadOutcome::Cancelled { history: req.history },
            Err(Some(detail)) => {
                req.emit(EngineEvent::Failed {
                    index: None,
                    kind: ErrorKind::AuthRequired,
                    detail: detail.clone(),
                });
                return DownloadOutcome::Aborted {
                    kind: ErrorKind::AuthRequired,
                    detail,
                    history: req.history,
                };
            }
        };

        let staging = match StagingArea::create(&config.output_dir).await {
            Ok(staging) => staging,
            Err(e) => {
                let detail = format!("cannot create staging directory: {}", e);
                req.emit(EngineEvent::Failed {
                    index: None,
                    kind: ErrorKind::Unknown,
                    detail: detail.clone(),
                });
                return DownloadOutcome::Aborted {
                    kind: ErrorKind::Unknown,
                    detail,
                    history: req.history,
                };
            }
        };

        let outcome = self.run_attempts(&mut req, &attempts, &staging, &metadata).await;
        staging.cleanup().await;
        outcome
    }

    async fn run_attempts(
        &self,
        req: &mut Request<'_>,
        attempts: &[Attempt],
        staging: &StagingArea,
        metadata: &Metadata,
    ) -> DownloadOutcome {
        let total = attempts.len();
        let mut previous: Option<&Strategy> = None;

        for attempt in attempts {
            if req.ctx.cancel.is_cancelled() {
                return DownloadOutcome::Cancelled {
                    history: std::mem::take(&mut req.history),
                };
            }

            if let Some(prev) = previous.filter(|p| p.name != attempt.strategy.name) {
                req.emit(EngineEvent::StrategySwitch {
                    from: prev.name.to_string(),
                    to: attempt.strategy.name.to_string(),
                });
            }
            previous = Some(&attempt.strategy);

            req.emit(EngineEvent::AttemptStarted {
                index: attempt.index,
                total,
                layer: attempt.layer.label.clone(),
                strategy: attempt.strategy.name.to_string(),
            });

            let mut invocations = 0u32;
            let mut removed_here = Vec::new();

            loop {
                invocations += 1;
                let failure = match self.invoke(req, attempt, staging).await {
                    Invocation::Produced(path) => {
                        match self
                            .locks
                            .finalize(&path, &req.config.output_dir, &req.config.naming_template, metadata)
                            .await
                        {
                            Ok(final_path) => {
                                req.record(attempt, AttemptOutcome::Success, String::new(), invocations, removed_here);
                                req.emit(EngineEvent::Success {
                                    index: attempt.index,
                                    path: final_path.clone(),
                                });
                                return DownloadOutcome::Success(DownloadSuccess {
                                    path: final_path,
                                    attempt: attempt.index,
                                    layer: attempt.layer.label.clone(),
                                    strategy: attempt.strategy.name.to_string(),
                                    removed_stages: req.removed.clone(),
                                    history: std::mem::take(&mut req.history),
                                });
                            }
                            Err(e) => BackendFailure::new(None, format!("cannot move output into place: {}", e)),
                        }
                    }
                    Invocation::Failed(failure) => failure,
                    Invocation::Cancelled => {
                        req.record(attempt, AttemptOutcome::Cancelled, String::new(), invocations, removed_here);
                        return DownloadOutcome::Cancelled {
                            history: std::mem::take(&mut req.history),
                        };
                    }
                };

                if let Err(e) = staging.reset().await {
                    log::warn!("Failed to reset staging dir: {}", e);
                }

                match self.next_step(req, attempt, &failure, &mut removed_here).await {
                    Next::RetrySame => continue,
                    Next::Advance(kind) => {
                        req.record(attempt, AttemptOutcome::Failed(kind), failure.message.clone(), invocations, removed_here);
                        req.emit(EngineEvent::Failed {
                            index: Some(attempt.index),
                            kind,
                            detail: failure.message,
                        });
                        break;
                    }
                    Next::Abort(kind) => {
                        req.record(attempt, AttemptOutcome::Aborted(kind), failure.message.clone(), invocations, removed_here);
                        req.emit(EngineEvent::Failed {
                            index: Some(attempt.index),
                            kind,
                            detail: failure.message.clone(),
                        });
                        req.emit(EngineEvent::Failed {
                            index: None,
                            kind,
                            detail: failure.message.clone(),
                        });
                        return DownloadOutcome::Aborted {
                            kind,
                            detail: failure.message,
                            history: std::mem::take(&mut req.history),
                        };
                    }
                    Next::Cancel => {
                        req.record(attempt, AttemptOutcome::Cancelled, failure.message, invocations, removed_here);
                        return DownloadOutcome::Cancelled {
                            history: std::mem::take(&mut req.history),
                        };
                    }
                }
            }
        }

        let history = std::mem::take(&mut req.history);
        let kind = final_kind(&history);
        let detail = history.last().map(|r| r.diagnostic.clone()).unwrap_or_default();
        req.emit(EngineEvent::Failed {
            index: None,
            kind,
            detail,
        });
        DownloadOutcome::Exhausted { history }
    }

    /// Classifies a failure and decides the transition. Applies chain
    /// degradation and cooldowns as side effects.
    async fn next_step(
        &self,
        req: &mut Request<'_>,
        attempt: &Attempt,
        failure: &BackendFailure,
        removed_here: &mut Vec<PostprocessorStage>,
    ) -> Next {
        let classification = self.classifier.classify(failure);

        match classification.kind {
            ErrorKind::EncodingFailure => match req.chain.degradation_target(&failure.message) {
                Some(stage) => {
                    req.emit(EngineEvent::PostprocessorWarning {
                        stage,
                        message: failure.message.clone(),
                    });
                    req.chain = req.chain.without(stage);
                    req.removed.push(stage);
                    removed_here.push(stage);
                    req.emit(EngineEvent::Retry {
                        index: attempt.index,
                        reason: RetryReason::DegradedChain,
                        delay: Duration::ZERO,
                    });
                    Next::RetrySame
                }
                // Nothing left to drop
                None => Next::Advance(ErrorKind::FormatUnavailable),
            },
            ErrorKind::RateLimited => {
                if !self.config.cooldown.allows(req.cooldowns_used) {
                    log::warn!(
                        "Cooldown cap ({}) reached for {}, moving on",
                        self.config.cooldown.max_retries,
                        req.reference
                    );
                    return Next::Advance(ErrorKind::RateLimited);
                }
                let delay = self.config.cooldown.delay_for_attempt(req.cooldowns_used);
                req.cooldowns_used += 1;
                req.emit(EngineEvent::Retry {
                    index: attempt.index,
                    reason: RetryReason::Cooldown,
                    delay,
                });
                if self.cool_down(delay, &mut req.ctx).await {
                    Next::RetrySame
                } else {
                    Next::Cancel
                }
            }
            ErrorKind::AuthRequired => Next::Abort(ErrorKind::AuthRequired),
            kind @ (ErrorKind::FormatUnavailable | ErrorKind::Unknown) => Next::Advance(kind),
        }
    }

    /// One backend invocation, raced against cancellation. Success only
    /// counts if a non-empty file exists.
    async fn invoke(&self, req: &Request<'_>, attempt: &Attempt, staging: &StagingArea) -> Invocation {
        let cancel = &req.ctx.cancel;
        let job = FetchJob {
            reference: req.reference,
            format_selector: &attempt.layer.selector,
            strategy_options: &attempt.strategy.options,
            chain: &req.chain,
            output_format: &req.config.output_format,
            staging_dir: staging.path(),
            geo_bypass: req.config.geo_bypass,
            cancel,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Invocation::Cancelled,
            result = self.backend.fetch_and_encode(&job, req.ctx.progress.as_ref()) => result,
        };

        match result {
            Ok(path) if is_valid_output(&path).await => Invocation::Produced(path),
            Ok(path) => Invocation::Failed(BackendFailure::new(
                None,
                format!("backend reported success but {} is missing or empty", path.display()),
            )),
            Err(failure) if failure.cancelled || cancel.is_cancelled() => Invocation::Cancelled,
            Err(failure) => Invocation::Failed(failure),
        }
    }

    /// Tries each strategy for metadata. `Err(None)` means cancelled,
    /// `Err(Some(detail))` means authentication is required.
    async fn resolve_metadata(&self, reference: &str, cancel: &CancellationToken) -> Result<Metadata, Option<String>> {
        for strategy in &self.strategies {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(None),
                result = self.backend.extract_metadata(reference, &strategy.options) => result,
            };

            match result {
                Ok(metadata) => {
                    log::debug!("Metadata for {} via {}: {}", reference, strategy.name, metadata.title);
                    return Ok(metadata);
                }
                Err(failure) if failure.cancelled => return Err(None),
                Err(failure) => {
                    let classification = self.classifier.classify(&failure);
                    if classification.kind == ErrorKind::AuthRequired {
                        return Err(Some(failure.message));
                    }
                    log::warn!(
                        "Metadata via {} failed ({}), trying next strategy",
                        strategy.name,
                        classification.kind
                    );
                }
            }
        }

        log::warn!("No strategy resolved metadata for {}, naming from the reference", reference);
        Ok(Metadata::from_reference(reference))
    }

    /// Cooldown that gives up the worker slot when long enough. Returns
    /// `false` if cancelled.
    async fn cool_down(&self, delay: Duration, ctx: &mut DownloadContext) -> bool {
        let yield_slot = delay >= self.config.yield_slot_after;
        if yield_slot {
            if let Some(slot) = ctx.slot.as_mut() {
                log::debug!("Releasing worker slot for a {:?} cooldown", delay);
                slot.release();
            }
        }

        let completed = self.pause(delay, &ctx.cancel).await;

        if let Some(slot) = ctx.slot.as_mut() {
            if !slot.is_held() {
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return false,
                    reacquired = slot.reacquire() => {
                        if let Err(e) = reacquired {
                            log::warn!("Could not reacquire worker slot: {}", e);
                        }
                    }
                }
            }
        }
        completed
    }

    /// Sleeps unless cancelled first. Returns `false` if cancelled.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.sleeper.sleep(delay) => true,
        }
    }
}

fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let ms = rand::rng().random_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
}
