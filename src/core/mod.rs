//! Core utilities, configuration, and common functionality

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logging;
pub mod retry;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_cookies_configuration};
pub use retry::RetryConfig;
