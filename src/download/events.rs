//! Structured engine events and the sinks that receive them.

use crate::download::postprocess::PostprocessorStage;
use crate::download::ytdlp_errors::ErrorKind;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Why the same attempt is invoked again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Rate-limit cooldown
    Cooldown,
    /// Encoder failure, retried with a shorter chain
    DegradedChain,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    QueueAdded {
        position: usize,
    },
    AttemptStarted {
        index: usize,
        total: usize,
        layer: String,
        strategy: String,
    },
    StrategySwitch {
        from: String,
        to: String,
    },
    ConfigOverride {
        setting: &'static str,
        reason: String,
    },
    PostprocessorWarning {
        stage: PostprocessorStage,
        message: String,
    },
    Retry {
        index: usize,
        reason: RetryReason,
        delay: Duration,
    },
    Success {
        index: usize,
        path: PathBuf,
    },
    /// `index` is set for a single failed attempt and `None` for the
    /// terminal failure of the whole request.
    Failed {
        index: Option<usize>,
        kind: ErrorKind,
        detail: String,
    },
}

impl EngineEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            EngineEvent::QueueAdded { .. } => "QUEUE",
            EngineEvent::AttemptStarted { .. } => "ATTEMPT",
            EngineEvent::StrategySwitch { .. } => "STRATEGY",
            EngineEvent::ConfigOverride { .. } => "CONFIG",
            EngineEvent::PostprocessorWarning { .. } => "POSTPROCESS",
            EngineEvent::Retry { .. } => "RETRY",
            EngineEvent::Success { .. } => "SUCCESS",
            EngineEvent::Failed { .. } => "FAILED",
        }
    }
}

/// Truncates diagnostics for one-line rendering.
fn short(detail: &str) -> &str {
    let line = detail.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    match line.char_indices().nth(150) {
        Some((cut, _)) => &line[..cut],
        None => line,
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::QueueAdded { position } => write!(f, "[QUEUE] added at position {}", position),
            EngineEvent::AttemptStarted {
                index,
                total,
                layer,
                strategy,
            } => write!(f, "[ATTEMPT {}/{}] {} | {}", index, total, layer, strategy),
            EngineEvent::StrategySwitch { from, to } => write!(f, "[STRATEGY] {} → {}", from, to),
            EngineEvent::ConfigOverride { setting, reason } => write!(f, "[CONFIG] {} overridden: {}", setting, reason),
            EngineEvent::PostprocessorWarning { stage, message } => {
                write!(f, "[POSTPROCESS] dropping {}: {}", stage, short(message))
            }
            EngineEvent::Retry { index, reason, delay } => {
                write!(f, "[RETRY] attempt {} ({:?}) after {:?}", index, reason, delay)
            }
            EngineEvent::Success { index, path } => {
                write!(f, "[SUCCESS] attempt {} → {}", index, path.display())
            }
            EngineEvent::Failed {
                index: Some(index),
                kind,
                detail,
            } => write!(f, "[FAILED] attempt {}: {} ({})", index, kind, short(detail)),
            EngineEvent::Failed {
                index: None,
                kind,
                detail,
            } => write!(f, "[FAILED] request: {} ({})", kind, short(detail)),
        }
    }
}

/// Receiver for engine events. Shared by concurrent requests, so
/// implementations must tolerate interleaved calls.
pub trait EventSink: Send + Sync {
    fn emit(&self, reference: &str, event: &EngineEvent);
}

/// Default sink: one text line per event on the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextEventSink;

impl EventSink for TextEventSink {
    fn emit(&self, reference: &str, event: &EngineEvent) {
        match event {
            EngineEvent::Failed { index: None, .. } => log::error!("{} {}", event, reference),
            EngineEvent::Failed { .. } | EngineEvent::PostprocessorWarning { .. } | EngineEvent::ConfigOverride { .. } => {
                log::warn!("{} {}", event, reference)
            }
            _ => log::info!("{} {}", event, reference),
        }
    }
}

/// Adapts a closure into a sink.
pub struct CallbackSink<F>(pub F);

impl<F> EventSink for CallbackSink<F>
where
    F: Fn(&str, &EngineEvent) + Send + Sync,
{
    fn emit(&self, reference: &str, event: &EngineEvent) {
        (self.0)(reference, event)
    }
}

/// Forwards every event to several sinks, in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, reference: &str, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(reference, event);
        }
    }
}
