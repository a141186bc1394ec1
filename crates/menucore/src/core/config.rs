//! Runtime configuration read from environment variables.
//!
//! The binary loads `.env` first, then builds one [`Config`] and passes it
//! down explicitly. Nothing here is cached in statics, so tests can build a
//! config from any key/value source through [`Config::from_lookup`].

use secrecy::SecretString;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::core::error::{AppError, AppResult};

/// LLM model used for menu generation when `GROQ_MODEL` is not set
pub const DEFAULT_GROQ_MODEL: &str = "llama-3.3-70b-versatile";

/// Local database file when no remote database is configured
pub const DEFAULT_DATABASE_PATH: &str = "menu_bot.db";

pub const DEFAULT_LOG_FILE_PATH: &str = "app.log";

pub const DEFAULT_SUPPORT_EMAIL: &str = "support@example.com";

/// Currency for subscription payments
pub const DEFAULT_CURRENCY: &str = "RUB";

/// Complete bot configuration.
#[derive(Debug)]
pub struct Config {
    /// Telegram bot token
    /// Read from BOT_TOKEN
    pub bot_token: SecretString,
    /// Read from GROQ_API_KEY
    pub groq_api_key: SecretString,
    /// Read from GROQ_MODEL
    /// Default: llama-3.3-70b-versatile
    pub groq_model: String,
    /// Read from SUPPORT_EMAIL
    pub support_email: String,
    /// Payment provider token
    /// Read from PAYMENT_TOKEN
    pub payment_token: SecretString,
    pub subscription: SubscriptionConfig,
    pub limits: LimitsConfig,
    pub database: DatabaseConfig,
    /// Read from LOG_FILE_PATH
    /// Default: app.log
    pub log_file_path: String,
}

/// Subscription pricing and durations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Price of one paid period
    /// Read from SUBSCRIPTION_PRICE_RUB
    /// Default: 299
    pub price_rub: u32,
    pub currency: String,
    /// Length of one paid period in days
    /// Read from SUBSCRIPTION_PERIOD_DAYS
    /// Default: 30
    pub period_days: i64,
    /// Length of the free trial in days
    /// Read from TRIAL_DAYS
    /// Default: 10
    pub trial_days: i64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            price_rub: 299,
            currency: DEFAULT_CURRENCY.to_string(),
            period_days: 30,
            trial_days: 10,
        }
    }
}

/// Maximum number of days a menu may cover, per effective tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitsConfig {
    /// Read from FREE_MAX_DAYS, default 3
    pub free_max_days: u32,
    /// Read from TRIAL_MAX_DAYS, default 31
    pub trial_max_days: u32,
    /// Read from PAID_MAX_DAYS, default 31
    pub paid_max_days: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_max_days: 3,
            trial_max_days: 31,
            paid_max_days: 31,
        }
    }
}

/// Which storage backend to open at startup.
///
/// The remote backend is chosen only when both a URL (REMOTE_DATABASE_URL,
/// or TURSO_DATABASE_URL) and a token (REMOTE_DATABASE_TOKEN, or
/// TURSO_AUTH_TOKEN) are non-empty. Anything else falls back to the local
/// file at DATABASE_PATH, or the path inside a `sqlite://` DATABASE_URL.
#[derive(Debug)]
pub enum DatabaseConfig {
    Local { path: String },
    Remote { url: String, auth_token: SecretString },
}

impl DatabaseConfig {
    pub fn is_remote(&self) -> bool {
        matches!(self, DatabaseConfig::Remote { .. })
    }

    /// Short description safe for logs (no credentials).
    pub fn describe(&self) -> String {
        match self {
            DatabaseConfig::Local { path } => format!("local sqlite ({path})"),
            DatabaseConfig::Remote { url, .. } => {
                // Strip any userinfo from the URL before logging it
                let host = url.rsplit('@').next().unwrap_or(url);
                let host = host.split("://").last().unwrap_or(host);
                format!("remote ({host})")
            }
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Empty or whitespace-only values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(&lookup, key);

        let subscription_defaults = SubscriptionConfig::default();
        let subscription = SubscriptionConfig {
            price_rub: parse_or(&lookup, "SUBSCRIPTION_PRICE_RUB", subscription_defaults.price_rub)?,
            currency: subscription_defaults.currency,
            period_days: positive(
                "SUBSCRIPTION_PERIOD_DAYS",
                parse_or(&lookup, "SUBSCRIPTION_PERIOD_DAYS", subscription_defaults.period_days)?,
            )?,
            trial_days: positive(
                "TRIAL_DAYS",
                parse_or(&lookup, "TRIAL_DAYS", subscription_defaults.trial_days)?,
            )?,
        };

        let limits_defaults = LimitsConfig::default();
        let limits = LimitsConfig {
            free_max_days: positive_u32(
                "FREE_MAX_DAYS",
                parse_or(&lookup, "FREE_MAX_DAYS", limits_defaults.free_max_days)?,
            )?,
            trial_max_days: positive_u32(
                "TRIAL_MAX_DAYS",
                parse_or(&lookup, "TRIAL_MAX_DAYS", limits_defaults.trial_max_days)?,
            )?,
            paid_max_days: positive_u32(
                "PAID_MAX_DAYS",
                parse_or(&lookup, "PAID_MAX_DAYS", limits_defaults.paid_max_days)?,
            )?,
        };

        let database = match (
            first_set(&get, &["REMOTE_DATABASE_URL", "TURSO_DATABASE_URL"]),
            first_set(&get, &["REMOTE_DATABASE_TOKEN", "TURSO_AUTH_TOKEN"]),
        ) {
            (Some((url_key, url)), Some((_, token))) => {
                check_remote_url(url_key, &url)?;
                DatabaseConfig::Remote {
                    url,
                    auth_token: SecretString::from(token),
                }
            }
            _ => DatabaseConfig::Local {
                path: match (get("DATABASE_PATH"), get("DATABASE_URL")) {
                    (Some(path), _) => path,
                    (None, Some(url)) => sqlite_path_from_url(&url)?,
                    (None, None) => DEFAULT_DATABASE_PATH.to_string(),
                },
            },
        };

        Ok(Self {
            bot_token: secret(get("BOT_TOKEN")),
            groq_api_key: secret(get("GROQ_API_KEY")),
            groq_model: get("GROQ_MODEL").unwrap_or_else(|| DEFAULT_GROQ_MODEL.to_string()),
            support_email: get("SUPPORT_EMAIL").unwrap_or_else(|| DEFAULT_SUPPORT_EMAIL.to_string()),
            payment_token: secret(get("PAYMENT_TOKEN")),
            subscription,
            limits,
            database,
            log_file_path: get("LOG_FILE_PATH").unwrap_or_else(|| DEFAULT_LOG_FILE_PATH.to_string()),
        })
    }
}

/// First non-empty variable among `keys`, with the key it came from.
fn first_set<G>(get: &G, keys: &[&'static str]) -> Option<(&'static str, String)>
where
    G: Fn(&str) -> Option<String>,
{
    keys.iter().find_map(|&key| get(key).map(|value| (key, value)))
}

/// The remote backend speaks PostgreSQL only.
fn check_remote_url(key: &str, url: &str) -> AppResult<()> {
    match url.split_once("://").map(|(scheme, _)| scheme.to_ascii_lowercase()) {
        Some(scheme) if scheme == "postgres" || scheme == "postgresql" => Ok(()),
        Some(scheme) => Err(AppError::Config(format!(
            "{key} must be a postgres:// URL, got a {scheme}:// URL"
        ))),
        None => Err(AppError::Config(format!("{key} must be a postgres:// URL"))),
    }
}

/// Extracts the file path from a SQLAlchemy-style `sqlite[+driver]:///path`
/// URL. A value without a scheme is taken as a path.
fn sqlite_path_from_url(raw: &str) -> AppResult<String> {
    let Some((scheme, rest)) = raw.split_once("://") else {
        return Ok(raw.to_string());
    };
    if scheme != "sqlite" && !scheme.starts_with("sqlite+") {
        return Err(AppError::Config(format!(
            "DATABASE_URL must be a sqlite:// URL or a file path, got a {scheme}:// URL"
        )));
    }
    // sqlite:///relative.db and sqlite:////absolute.db
    let path = rest.strip_prefix('/').unwrap_or(rest);
    if path.is_empty() {
        return Err(AppError::Config("DATABASE_URL has no file path".to_string()));
    }
    Ok(path.to_string())
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::Config(format!("{key}={raw:?} is not valid: {e}"))),
        None => Ok(default),
    }
}

fn positive(key: &str, value: i64) -> AppResult<i64> {
    if value < 1 {
        return Err(AppError::Config(format!("{key} must be at least 1, got {value}")));
    }
    Ok(value)
}

fn positive_u32(key: &str, value: u32) -> AppResult<u32> {
    if value == 0 {
        return Err(AppError::Config(format!("{key} must be at least 1")));
    }
    Ok(value)
}

fn secret(value: Option<String>) -> SecretString {
    SecretString::from(value.unwrap_or_default())
}
