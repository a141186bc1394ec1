//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use config::{Config, DatabaseConfig, LimitsConfig, SubscriptionConfig};
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
