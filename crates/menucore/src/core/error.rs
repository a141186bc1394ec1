use thiserror::Error;

/// Centralized error type for the menu bot core.
///
/// Every storage backend, the config loader and the subscription actions
/// convert their failures into this enum, so callers only ever match on one
/// error type.
///
/// # Example
///
/// ```no_run
/// use menucore::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     log::error!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Local SQLite errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Local connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Remote database errors
    #[error("Remote database error: {0}")]
    Remote(#[from] sqlx::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    /// JSON column (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking storage task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Invalid or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before it reached storage
    #[error("Validation error: {0}")]
    Validation(String),

    /// A referenced record does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;
