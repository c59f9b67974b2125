//! Download engine: catalogs, planning, postprocessing, classification,
//! orchestration and the worker pool.

pub mod backend;
pub mod engine;
pub mod events;
pub mod formats;
pub mod options;
pub mod output;
pub mod planner;
pub mod postprocess;
pub mod progress;
pub mod queue;
pub mod source;
pub mod strategies;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use backend::{BackendFailure, FetchJob, MediaBackend, Metadata, ProgressCallback, ProgressUpdate};
pub use engine::{
    AttemptOutcome, AttemptResult, DownloadContext, DownloadOutcome, DownloadSuccess, Engine, EngineConfig, Sleeper,
    TokioSleeper,
};
pub use events::{CallbackSink, EngineEvent, EventSink, FanoutSink, RetryReason, TextEventSink};
pub use formats::{layers_for, list_audio_layers, list_format_layers, FormatLayer};
pub use options::{DownloadConfiguration, Mode, QualityTier};
pub use planner::{plan, Attempt};
pub use postprocess::{PostprocessorChain, PostprocessorStage};
pub use queue::{DownloadQueue, QueueSummary, WorkerSlot};
pub use source::{CookieSource, YtDlpBackend};
pub use strategies::{find_strategy, list_strategies, Strategy};
pub use ytdlp_errors::{Classification, ClassificationRule, Classifier, ErrorKind};
