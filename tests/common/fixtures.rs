//! Shared fixtures: small ladders, a fake clock and engine wiring

#![allow(dead_code)]

use async_trait::async_trait;
use ladder_dl::core::RetryConfig;
use ladder_dl::download::{
    list_strategies, DownloadConfiguration, Engine, EngineConfig, FormatLayer, MediaBackend, Sleeper, Strategy,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Default)]
pub struct FakeClock {
    slept: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for FakeClock {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

pub fn layer(rank: usize, selector: &str) -> FormatLayer {
    FormatLayer {
        rank,
        selector: selector.to_string(),
        label: format!("L{}", rank),
        max_height: None,
    }
}

/// `[L1, L2]`
pub fn two_layers() -> Vec<FormatLayer> {
    vec![layer(1, "bestvideo+bestaudio"), layer(2, "best")]
}

/// `[Standard, Android Bypass]`
pub fn two_strategies() -> Vec<Strategy> {
    list_strategies().into_iter().take(2).collect()
}

/// Cooldown curve used by tests: 15s doubling up to 60s, at most 3.
pub fn test_cooldown() -> RetryConfig {
    RetryConfig::new()
        .max_retries(3)
        .initial_delay(Duration::from_secs(15))
        .max_delay(Duration::from_secs(60))
        .backoff_multiplier(2.0)
        .no_jitter()
}

pub fn engine_config() -> EngineConfig {
    EngineConfig::default().no_start_jitter().cooldown(test_cooldown())
}

/// Engine over `[L1, L2] x [Standard, Android]` with a fake clock.
pub fn small_engine(backend: Arc<dyn MediaBackend>, clock: Arc<FakeClock>) -> Engine {
    Engine::new(backend, engine_config())
        .with_sleeper(clock)
        .with_layers(two_layers())
        .with_strategies(two_strategies())
}

/// Video configuration writing into a fresh temporary directory.
pub fn configuration() -> (TempDir, DownloadConfiguration) {
    let dir = TempDir::new().unwrap();
    let cfg = DownloadConfiguration {
        output_dir: dir.path().to_path_buf(),
        ..DownloadConfiguration::default()
    };
    (dir, cfg)
}

/// Files left in a directory, hidden entries included.
pub fn dir_entries(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
