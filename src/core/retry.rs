//! Backoff curve for rate-limit cooldowns.
//!
//! The engine re-invokes the same attempt after a rate-limit signal, waiting
//! longer each time:
//! - Exponential backoff with optional jitter
//! - Per-delay ceiling
//! - Max cooldown count per request

use crate::core::config;
use std::time::Duration;

/// Retry strategy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of cooldown retries for one request
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::rate_limit()
    }
}

impl RetryConfig {
    /// Creates a new retry config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn no_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Calculates delay for a given retry number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // Add up to 25% jitter, still never above the ceiling
            let jitter = rand::random::<f64>() * 0.25 * capped_delay;
            (capped_delay + jitter).min(self.max_delay.as_secs_f64())
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    /// Whether another cooldown is allowed after `used` cooldowns.
    pub fn allows(&self, used: u32) -> bool {
        used < self.max_retries
    }
}

/// Predefined configs.
impl RetryConfig {
    /// Cooldown curve for server-side rate limiting.
    pub fn rate_limit() -> Self {
        Self {
            max_retries: config::cooldown::MAX_COOLDOWNS,
            initial_delay: config::cooldown::initial(),
            max_delay: config::cooldown::max(),
            backoff_multiplier: config::cooldown::BACKOFF_MULTIPLIER,
            add_jitter: false,
        }
    }

    /// No cooldowns at all: a rate-limit signal advances immediately.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }
}
