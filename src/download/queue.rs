use crate::core::config;
use crate::download::backend::ProgressCallback;
use crate::download::engine::{DownloadContext, DownloadOutcome, Engine};
use crate::download::events::{EngineEvent, EventSink, TextEventSink};
use crate::download::options::DownloadConfiguration;
use log::info;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Maximum number of tasks allowed in the queue to prevent unbounded memory growth.
const MAX_QUEUE_SIZE: usize = 1000;

/// One unit of worker-pool capacity.
///
/// Held by a request for its whole run. A request waiting out a long
/// cooldown releases it so queued requests can start, then waits to get a
/// slot back before its next invocation.
#[derive(Debug)]
pub struct WorkerSlot {
    semaphore: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
}

impl WorkerSlot {
    /// Waits for a free slot.
    pub async fn acquire(semaphore: Arc<Semaphore>) -> Result<Self, AcquireError> {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        Ok(Self {
            semaphore,
            permit: Some(permit),
        })
    }

    pub fn is_held(&self) -> bool {
        self.permit.is_some()
    }

    /// Gives the slot back to the pool. No-op if already released.
    pub fn release(&mut self) {
        self.permit = None;
    }

    /// Waits for a slot again. No-op if still held.
    pub async fn reacquire(&mut self) -> Result<(), AcquireError> {
        if self.permit.is_none() {
            self.permit = Some(Arc::clone(&self.semaphore).acquire_owned().await?);
        }
        Ok(())
    }
}

/// A queued download request.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Unique task identifier (UUID)
    pub id: String,
    pub reference: String,
    pub config: DownloadConfiguration,
    pub cancel: CancellationToken,
}

impl DownloadTask {
    fn key(&self) -> (String, String, String) {
        (
            self.reference.trim().to_string(),
            self.config.mode.as_str().to_string(),
            self.config.output_format.clone(),
        )
    }
}

/// Counts and per-request outcomes of one `run`.
#[derive(Debug, Default)]
pub struct QueueSummary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `(reference, outcome)` in completion order
    pub outcomes: Vec<(String, DownloadOutcome)>,
}

impl QueueSummary {
    fn record(&mut self, reference: String, outcome: DownloadOutcome) {
        match &outcome {
            DownloadOutcome::Success(_) => self.completed += 1,
            DownloadOutcome::Cancelled { .. } => self.cancelled += 1,
            DownloadOutcome::Exhausted { .. } | DownloadOutcome::Aborted { .. } => self.failed += 1,
        }
        self.outcomes.push((reference, outcome));
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Bounded worker pool over one shared `Engine`.
///
/// Tasks run in FIFO order, at most `concurrency` at a time, with a minimum
/// delay between consecutive starts. A (reference, mode, format) already
/// queued or running is rejected as a duplicate.
pub struct DownloadQueue {
    engine: Arc<Engine>,
    semaphore: Arc<Semaphore>,
    queue: Mutex<VecDeque<DownloadTask>>,
    /// Queued + running task keys
    active_tasks: Mutex<HashSet<(String, String, String)>>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    events: Arc<dyn EventSink>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    inter_download_delay: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl DownloadQueue {
    pub fn new(engine: Arc<Engine>, concurrency: usize) -> Self {
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            queue: Mutex::new(VecDeque::new()),
            active_tasks: Mutex::new(HashSet::new()),
            tokens: Mutex::new(HashMap::new()),
            events: Arc::new(TextEventSink),
            progress: None,
            cancel: CancellationToken::new(),
            inter_download_delay: config::queue::inter_download_delay(),
            last_start: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_inter_download_delay(mut self, delay: Duration) -> Self {
        self.inter_download_delay = delay;
        self
    }

    /// Free worker slots right now.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Queues a request. Returns the task id, or `None` if it duplicates a
    /// queued/running request or the queue is full.
    pub async fn add_task(&self, reference: &str, config: DownloadConfiguration) -> Option<String> {
        let task = DownloadTask {
            id: uuid::Uuid::new_v4().to_string(),
            reference: reference.trim().to_string(),
            config,
            cancel: self.cancel.child_token(),
        };

        let key = task.key();
        let mut active_tasks = self.active_tasks.lock().await;
        if active_tasks.contains(&key) {
            log::warn!(
                "Duplicate request for '{}' ({} {}), skipping",
                task.reference,
                key.1,
                key.2
            );
            return None;
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= MAX_QUEUE_SIZE {
            log::warn!("Queue is full ({} tasks), rejecting {}", queue.len(), task.reference);
            return None;
        }

        active_tasks.insert(key);
        drop(active_tasks);

        self.tokens.lock().await.insert(task.id.clone(), task.cancel.clone());
        queue.push_back(task.clone());
        let position = queue.len();
        drop(queue);

        info!("Queued {} at position {} (id {})", task.reference, position, task.id);
        self.events.emit(&task.reference, &EngineEvent::QueueAdded { position });
        Some(task.id)
    }

    /// Expands a playlist into one task per entry (a single video yields
    /// one task). Returns the ids of the tasks actually queued.
    pub async fn add_reference(&self, reference: &str, config: DownloadConfiguration) -> Vec<String> {
        let mut entries = self.engine.expand_reference(reference.trim(), &self.cancel).await;
        if config.reverse_playlist {
            entries.reverse();
        }

        let mut ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            if let Some(id) = self.add_task(entry, config.clone()).await {
                ids.push(id);
            }
        }
        if entries.len() > 1 {
            info!("Queued {} of {} entries from {}", ids.len(), entries.len(), reference);
        }
        ids
    }

    /// Number of tasks waiting to start.
    pub async fn size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Cancels one task, queued or running. Returns `false` for unknown ids.
    pub async fn cancel(&self, task_id: &str) -> bool {
        match self.tokens.lock().await.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every queued and running task.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels the whole queue when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every queued task to completion and returns the summary.
    pub async fn run(self: Arc<Self>) -> QueueSummary {
        let mut workers: JoinSet<(String, DownloadOutcome)> = JoinSet::new();
        let mut summary = QueueSummary::default();

        loop {
            let Some(task) = self.queue.lock().await.pop_front() else {
                break;
            };

            if task.cancel.is_cancelled() {
                self.finish(&task).await;
                summary.record(task.reference, DownloadOutcome::Cancelled { history: Vec::new() });
                continue;
            }

            let slot = tokio::select! {
                biased;
                _ = task.cancel.cancelled() => None,
                slot = WorkerSlot::acquire(Arc::clone(&self.semaphore)) => match slot {
                    Ok(slot) => Some(slot),
                    Err(e) => {
                        log::error!("Failed to acquire worker slot for task {}: {}", task.id, e);
                        None
                    }
                },
            };
            let Some(slot) = slot else {
                self.finish(&task).await;
                summary.record(task.reference, DownloadOutcome::Cancelled { history: Vec::new() });
                continue;
            };

            self.wait_turn(&task).await;
            info!(
                "Starting task {} (slots available: {})",
                task.id,
                self.semaphore.available_permits()
            );

            let queue = Arc::clone(&self);
            workers.spawn(async move {
                let mut ctx = DownloadContext::new(task.cancel.clone())
                    .with_slot(slot)
                    .with_events(Arc::clone(&queue.events));
                if let Some(progress) = &queue.progress {
                    ctx = ctx.with_progress(Arc::clone(progress));
                }
                let outcome = queue.engine.download(&task.reference, &task.config, ctx).await;
                queue.finish(&task).await;
                (task.reference, outcome)
            });

            // Reap whatever already finished so the summary keeps completion order
            while let Some(done) = workers.try_join_next() {
                Self::collect(&mut summary, done);
            }
        }

        while let Some(done) = workers.join_next().await {
            Self::collect(&mut summary, done);
        }

        info!(
            "Queue drained: {} completed, {} failed, {} cancelled",
            summary.completed, summary.failed, summary.cancelled
        );
        summary
    }

    fn collect(summary: &mut QueueSummary, done: Result<(String, DownloadOutcome), tokio::task::JoinError>) {
        match done {
            Ok((reference, outcome)) => summary.record(reference, outcome),
            Err(e) => {
                log::error!("Download worker panicked: {}", e);
                summary.failed += 1;
            }
        }
    }

    /// Enforces the minimum delay between consecutive starts.
    async fn wait_turn(&self, task: &DownloadTask) {
        let mut last_start = self.last_start.lock().await;
        if let Some(last) = *last_start {
            let elapsed = last.elapsed();
            if elapsed < self.inter_download_delay {
                let wait = self.inter_download_delay - elapsed;
                log::debug!("Waiting {:?} before starting task {}", wait, task.id);
                tokio::select! {
                    _ = task.cancel.cancelled() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
        *last_start = Some(Instant::now());
    }

    async fn finish(&self, task: &DownloadTask) {
        self.active_tasks.lock().await.remove(&task.key());
        self.tokens.lock().await.remove(&task.id);
    }
}
