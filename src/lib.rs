//! ladder-dl - fallback-driven media downloader
//!
//! Downloads a media reference by walking a ladder of format selectors
//! crossed with client-identity strategies, classifying every backend
//! failure and deciding whether to degrade the postprocessor chain, cool
//! down, advance, or give up.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging, cooldown curve, diagnostics
//! - `download`: catalogs, planner, chain builder, classifier, engine, queue
//! - `cli`: argument parsing and outcome rendering for the `ladder` binary

pub mod cli;
pub mod core;
pub mod download;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use download::{DownloadConfiguration, DownloadOutcome, DownloadQueue, Engine, EngineConfig, YtDlpBackend};
