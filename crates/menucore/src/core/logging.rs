//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (stderr + file) on top of `tracing-subscriber`
//! - A bridge so `log::` macros used across the crate reach the subscriber
//! - Startup configuration summary (secrets are only reported as set/unset)

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::core::config::Config;

/// Initialize logger for both console and file output
///
/// The filter comes from `RUST_LOG` and defaults to `info`. The log file is
/// appended to, so restarts keep earlier history.
///
/// # Arguments
/// * `log_file_path` - Path to the log file
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Log file could not be opened or a logger is already installed
pub fn init_logger(log_file_path: &str) -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .with_context(|| format!("Failed to open log file {log_file_path}"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(log_file)));

    tracing::subscriber::set_global_default(subscriber).context("Failed to install tracing subscriber")?;
    tracing_log::LogTracer::init().context("Failed to bridge log records into tracing")?;

    Ok(())
}

/// Logs the effective configuration at application startup
pub fn log_startup_configuration(config: &Config) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("  • Database: {}", config.database.describe());
    log::info!("  • BOT_TOKEN: {}", presence(&config.bot_token));
    log::info!("  • PAYMENT_TOKEN: {}", presence(&config.payment_token));
    log::info!("  • GROQ_API_KEY: {}", presence(&config.groq_api_key));
    log::info!("  • GROQ_MODEL: {}", config.groq_model);
    log::info!(
        "  • Subscription: {} {} per {} days, trial {} days",
        config.subscription.price_rub,
        config.subscription.currency,
        config.subscription.period_days,
        config.subscription.trial_days
    );
    log::info!(
        "  • Menu length limits (free/trial/paid): {}/{}/{} days",
        config.limits.free_max_days,
        config.limits.trial_max_days,
        config.limits.paid_max_days
    );

    if config.bot_token.expose_secret().is_empty() {
        log::warn!("BOT_TOKEN is not set, the Telegram layer will refuse to start");
    }
}

fn presence(secret: &SecretString) -> &'static str {
    if secret.expose_secret().is_empty() {
        "not set"
    } else {
        "set"
    }
}
