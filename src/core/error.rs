use thiserror::Error;

/// Centralized error types for the application
///
/// Everything that is not an attempt-level backend failure ends up here.
/// Backend failures are values (`BackendFailure`) that the engine classifies
/// and folds into the attempt history instead of propagating.
///
/// # Example
///
/// ```no_run
/// use ladder_dl::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     eprintln!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Settings that parse but make no sense (zero workers, empty format)
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;
