//! Durable storage for users, eater profiles, menus and payments
//!
//! Two backends implement [`Storage`]: a local SQLite file ([`db`]) and a
//! remote PostgreSQL database ([`remote`]). [`open_storage`] picks one from
//! configuration, so call sites only ever see `Arc<dyn Storage>`.

pub mod db;
pub mod migrations;
pub mod models;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::config::DatabaseConfig;
use crate::core::error::AppResult;

pub use db::{create_pool, get_connection, DbConnection, DbPool, SqliteStorage};
pub use models::{
    EaterProfile, Menu, MenuStatus, NewEaterProfile, NewMenu, NewPayment, Payment, PaymentCompletion, PaymentStatus,
    User,
};
pub use remote::RemoteStorage;

/// Typed access to the bot's records.
///
/// Handles are shared as `Arc<dyn Storage>` across tasks. Lifecycle is
/// connect → migrate → ready (all inside [`open_storage`]) and ends with
/// [`Storage::close`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short backend identifier for logs ("sqlite", "postgres").
    fn backend_name(&self) -> &'static str;

    async fn get_user(&self, telegram_id: i64) -> AppResult<Option<User>>;

    async fn get_user_by_id(&self, id: i64) -> AppResult<Option<User>>;

    /// Returns the user with this Telegram ID, creating a `free` one on first
    /// contact. An existing row is returned unchanged.
    async fn get_or_create_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        full_name: Option<&str>,
    ) -> AppResult<User>;

    /// Sets `plan = trial` with the window `[start, end)`.
    async fn start_trial(&self, user_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()>;

    /// Sets `plan = paid` with the given expiry.
    async fn set_paid_until(&self, user_id: i64, paid_until: DateTime<Utc>) -> AppResult<()>;

    async fn add_eater_profile(&self, profile: NewEaterProfile) -> AppResult<EaterProfile>;

    async fn list_eater_profiles(&self, user_id: i64) -> AppResult<Vec<EaterProfile>>;

    /// Returns `false` if nothing was deleted.
    async fn delete_eater_profile(&self, id: i64) -> AppResult<bool>;

    /// Stores a new `draft` menu.
    async fn create_menu(&self, menu: NewMenu) -> AppResult<Menu>;

    async fn get_menu(&self, id: i64) -> AppResult<Option<Menu>>;

    /// Menus of a user, newest first.
    async fn list_menus(&self, user_id: i64) -> AppResult<Vec<Menu>>;

    async fn set_menu_status(&self, id: i64, status: MenuStatus) -> AppResult<()>;

    /// Stores a new `pending` payment.
    async fn create_payment(&self, payment: NewPayment) -> AppResult<Payment>;

    async fn get_payment(&self, id: i64) -> AppResult<Option<Payment>>;

    /// `success` is final; changing it afterwards is a validation error.
    async fn set_payment_status(
        &self,
        id: i64,
        status: PaymentStatus,
        provider_payment_id: Option<&str>,
    ) -> AppResult<()>;

    /// Payments of a user, newest first.
    async fn list_payments(&self, user_id: i64) -> AppResult<Vec<Payment>>;

    /// Atomically marks the payment `success` and sets its user to `paid`,
    /// extending the expiry by `period_days` from the later of `now` and a
    /// running paid period. The user's current expiry is read inside the same
    /// transaction, so concurrent completions for one user each add a period.
    /// A payment that had already succeeded changes nothing.
    async fn complete_payment(
        &self,
        id: i64,
        provider_payment_id: Option<&str>,
        now: DateTime<Utc>,
        period_days: i64,
    ) -> AppResult<PaymentCompletion>;

    /// Releases connections. The handle must not be used afterwards.
    async fn close(&self);
}

/// Connects to the configured backend and brings its schema up to date.
pub async fn open_storage(config: &DatabaseConfig) -> AppResult<Arc<dyn Storage>> {
    log::info!("Opening storage: {}", config.describe());

    let storage: Arc<dyn Storage> = match config {
        DatabaseConfig::Local { path } => Arc::new(SqliteStorage::open(path).await?),
        DatabaseConfig::Remote { url, auth_token } => Arc::new(RemoteStorage::connect(url, auth_token).await?),
    };

    log::info!("Storage ready ({})", storage.backend_name());
    Ok(storage)
}
