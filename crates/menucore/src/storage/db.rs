//! Local SQLite backend.
//!
//! Queries are plain functions over a [`Connection`] so they can be tested
//! against an in-memory database; [`SqliteStorage`] wraps them behind the
//! async [`Storage`] trait and runs them on the blocking thread pool.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde_json::Value as JsonValue;
use std::time::Duration;

use super::migrations::run_migrations;
use super::models::{
    validate_trial_window, EaterProfile, Menu, MenuStatus, NewEaterProfile, NewMenu, NewPayment, Payment,
    PaymentCompletion, PaymentStatus, User,
};
use super::Storage;
use crate::core::error::{AppError, AppResult};
use crate::plan::{extended_paid_until, Plan};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

const USER_COLUMNS: &str =
    "id, telegram_id, username, full_name, plan, trial_start, trial_end, paid_until, created_at";
const MENU_COLUMNS: &str =
    "id, user_id, diet_type, num_people, num_days, meals_per_day, content, shopping_list, created_at, status";
const PAYMENT_COLUMNS: &str = "id, user_id, amount, currency, status, payment_id, created_at";

/// Create a new database connection pool
///
/// Every pooled connection enforces foreign keys and waits on a busy file
/// instead of failing immediately.
///
/// # Arguments
///
/// * `database_path` - Path to SQLite database file
///
/// # Example
///
/// ```no_run
/// use menucore::storage::db;
///
/// let pool = db::create_pool("menu_bot.db")?;
/// # Ok::<(), r2d2::Error>(())
/// ```
pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)
}

/// Get a connection from the pool
///
/// The connection is returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

fn to_sql_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

fn opt_time_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(idx, &s)).transpose()
}

fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<JsonValue> {
    serde_json::from_str(raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let plan: String = row.get(4)?;
    Ok(User {
        id: row.get(0)?,
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        full_name: row.get(3)?,
        plan: Plan::from_stored(&plan),
        trial_start: opt_time_col(row, 5)?,
        trial_end: opt_time_col(row, 6)?,
        paid_until: opt_time_col(row, 7)?,
        created_at: time_col(row, 8)?,
    })
}

fn parse_profile(row: &Row<'_>) -> rusqlite::Result<EaterProfile> {
    Ok(EaterProfile {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        age: row.get(3)?,
        preferences: row.get(4)?,
    })
}

fn parse_menu(row: &Row<'_>) -> rusqlite::Result<Menu> {
    let meals_per_day: String = row.get(5)?;
    let content: String = row.get(6)?;
    let shopping_list: Option<String> = row.get(7)?;
    let status: String = row.get(9)?;
    Ok(Menu {
        id: row.get(0)?,
        user_id: row.get(1)?,
        diet_type: row.get(2)?,
        num_people: row.get(3)?,
        num_days: row.get(4)?,
        meals_per_day: parse_json(5, &meals_per_day)?,
        content: parse_json(6, &content)?,
        shopping_list: shopping_list.map(|s| parse_json(7, &s)).transpose()?,
        created_at: time_col(row, 8)?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?,
    })
}

fn parse_payment(row: &Row<'_>) -> rusqlite::Result<Payment> {
    let status: String = row.get(4)?;
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        payment_id: row.get(5)?,
        created_at: time_col(row, 6)?,
    })
}

/// Fetches a user by Telegram ID.
pub fn get_user(conn: &Connection, telegram_id: i64) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE telegram_id = ?1"),
            params![telegram_id],
            parse_user,
        )
        .optional()?;
    Ok(user)
}

/// Fetches a user by internal row ID.
pub fn get_user_by_id(conn: &Connection, id: i64) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            parse_user,
        )
        .optional()?;
    Ok(user)
}

/// Returns the user with this Telegram ID, inserting a `free` user first if
/// none exists. Existing rows are never modified.
pub fn get_or_create_user(
    conn: &Connection,
    telegram_id: i64,
    username: Option<&str>,
    full_name: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<User> {
    let inserted = conn.execute(
        "INSERT INTO users (telegram_id, username, full_name, plan, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(telegram_id) DO NOTHING",
        params![telegram_id, username, full_name, Plan::Free.as_ref(), to_sql_time(now)],
    )?;
    if inserted > 0 {
        log::info!("Created user telegram_id={}", telegram_id);
    }

    get_user(conn, telegram_id)?.ok_or_else(|| AppError::NotFound(format!("user telegram_id={telegram_id}")))
}

/// Marks the user as being on a trial for `[start, end)`.
pub fn start_trial(conn: &Connection, user_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    validate_trial_window(start, end)?;
    let updated = conn.execute(
        "UPDATE users SET plan = ?1, trial_start = ?2, trial_end = ?3 WHERE id = ?4",
        params![Plan::Trial.as_ref(), to_sql_time(start), to_sql_time(end), user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("user id={user_id}")));
    }
    Ok(())
}

/// Sets the paid label and its expiry.
pub fn set_paid_until(conn: &Connection, user_id: i64, paid_until: DateTime<Utc>) -> AppResult<()> {
    let updated = conn.execute(
        "UPDATE users SET plan = ?1, paid_until = ?2 WHERE id = ?3",
        params![Plan::Paid.as_ref(), to_sql_time(paid_until), user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("user id={user_id}")));
    }
    Ok(())
}

pub fn add_eater_profile(conn: &Connection, profile: &NewEaterProfile) -> AppResult<EaterProfile> {
    profile.validate()?;
    conn.execute(
        "INSERT INTO eater_profiles (user_id, name, age, preferences) VALUES (?1, ?2, ?3, ?4)",
        params![profile.user_id, profile.name, profile.age, profile.preferences],
    )?;
    Ok(EaterProfile {
        id: conn.last_insert_rowid(),
        user_id: profile.user_id,
        name: profile.name.clone(),
        age: profile.age,
        preferences: profile.preferences.clone(),
    })
}

pub fn list_eater_profiles(conn: &Connection, user_id: i64) -> AppResult<Vec<EaterProfile>> {
    let mut stmt =
        conn.prepare("SELECT id, user_id, name, age, preferences FROM eater_profiles WHERE user_id = ?1 ORDER BY id")?;
    let profiles = stmt
        .query_map(params![user_id], parse_profile)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(profiles)
}

/// Returns `false` if no profile had this ID.
pub fn delete_eater_profile(conn: &Connection, id: i64) -> AppResult<bool> {
    let deleted = conn.execute("DELETE FROM eater_profiles WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn create_menu(conn: &Connection, menu: &NewMenu, now: DateTime<Utc>) -> AppResult<Menu> {
    menu.validate()?;
    let shopping_list = menu.shopping_list.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO menus (user_id, diet_type, num_people, num_days, meals_per_day, content, shopping_list, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            menu.user_id,
            menu.diet_type,
            menu.num_people,
            menu.num_days,
            serde_json::to_string(&menu.meals_per_day)?,
            serde_json::to_string(&menu.content)?,
            shopping_list,
            to_sql_time(now),
            MenuStatus::Draft.as_ref(),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_menu(conn, id)?.ok_or_else(|| AppError::NotFound(format!("menu id={id}")))
}

pub fn get_menu(conn: &Connection, id: i64) -> AppResult<Option<Menu>> {
    let menu = conn
        .query_row(
            &format!("SELECT {MENU_COLUMNS} FROM menus WHERE id = ?1"),
            params![id],
            parse_menu,
        )
        .optional()?;
    Ok(menu)
}

/// Menus of a user, newest first.
pub fn list_menus(conn: &Connection, user_id: i64) -> AppResult<Vec<Menu>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MENU_COLUMNS} FROM menus WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let menus = stmt
        .query_map(params![user_id], parse_menu)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(menus)
}

pub fn set_menu_status(conn: &Connection, id: i64, status: MenuStatus) -> AppResult<()> {
    let updated = conn.execute("UPDATE menus SET status = ?1 WHERE id = ?2", params![status.as_ref(), id])?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("menu id={id}")));
    }
    Ok(())
}

pub fn create_payment(conn: &Connection, payment: &NewPayment, now: DateTime<Utc>) -> AppResult<Payment> {
    payment.validate()?;
    conn.execute(
        "INSERT INTO payments (user_id, amount, currency, status, payment_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            payment.user_id,
            payment.amount,
            payment.currency,
            PaymentStatus::Pending.as_ref(),
            payment.payment_id,
            to_sql_time(now),
        ],
    )?;
    let id = conn.last_insert_rowid();
    get_payment(conn, id)?.ok_or_else(|| AppError::NotFound(format!("payment id={id}")))
}

pub fn get_payment(conn: &Connection, id: i64) -> AppResult<Option<Payment>> {
    let payment = conn
        .query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
            params![id],
            parse_payment,
        )
        .optional()?;
    Ok(payment)
}

/// Updates the status; a provided provider ID replaces the stored one.
///
/// `success` is final: the update is skipped for an already successful
/// payment and reported as a validation error.
pub fn set_payment_status(
    conn: &Connection,
    id: i64,
    status: PaymentStatus,
    provider_payment_id: Option<&str>,
) -> AppResult<()> {
    let updated = conn.execute(
        "UPDATE payments SET status = ?1, payment_id = COALESCE(?2, payment_id)
         WHERE id = ?3 AND status <> ?4",
        params![
            status.as_ref(),
            provider_payment_id,
            id,
            PaymentStatus::Success.as_ref()
        ],
    )?;
    if updated == 0 {
        return match get_payment(conn, id)? {
            Some(_) => Err(AppError::Validation(format!(
                "payment {id} already succeeded; its status is final"
            ))),
            None => Err(AppError::NotFound(format!("payment id={id}"))),
        };
    }
    Ok(())
}

pub fn list_payments(conn: &Connection, user_id: i64) -> AppResult<Vec<Payment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
    ))?;
    let payments = stmt
        .query_map(params![user_id], parse_payment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(payments)
}

/// Marks a payment successful and extends its user's paid period by
/// `period_days`, in one write transaction.
///
/// The transaction starts IMMEDIATE, so the user's current expiry is read
/// under the write lock and concurrent completions queue on the busy timeout
/// instead of failing on lock upgrade.
pub fn complete_payment(
    conn: &mut Connection,
    id: i64,
    provider_payment_id: Option<&str>,
    now: DateTime<Utc>,
    period_days: i64,
) -> AppResult<PaymentCompletion> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let payment = tx
        .query_row(
            &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1"),
            params![id],
            parse_payment,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("payment id={id}")))?;
    let user = get_user_by_id(&tx, payment.user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user id={}", payment.user_id)))?;

    if payment.status == PaymentStatus::Success {
        return Ok(PaymentCompletion::AlreadyApplied {
            paid_until: user.paid_until,
        });
    }

    let paid_until = extended_paid_until(&user.plan_state(), now, period_days);

    tx.execute(
        "UPDATE payments SET status = ?1, payment_id = COALESCE(?2, payment_id) WHERE id = ?3",
        params![PaymentStatus::Success.as_ref(), provider_payment_id, id],
    )?;
    tx.execute(
        "UPDATE users SET plan = ?1, paid_until = ?2 WHERE id = ?3",
        params![Plan::Paid.as_ref(), to_sql_time(paid_until), user.id],
    )?;
    tx.commit()?;

    Ok(PaymentCompletion::Applied { paid_until })
}

/// [`Storage`] backed by a local SQLite file.
pub struct SqliteStorage {
    pool: DbPool,
}

impl SqliteStorage {
    /// Opens the pool and brings the schema up to date.
    pub async fn open(database_path: &str) -> AppResult<Self> {
        let pool = create_pool(database_path)?;
        let storage = Self { pool };
        storage.run(|conn| run_migrations(conn)).await?;
        log::info!("SQLite storage ready at {}", database_path);
        Ok(storage)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = get_connection(&pool)?;
            f(&mut *conn)
        })
        .await?
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn get_user(&self, telegram_id: i64) -> AppResult<Option<User>> {
        self.run(move |conn| get_user(conn, telegram_id)).await
    }

    async fn get_user_by_id(&self, id: i64) -> AppResult<Option<User>> {
        self.run(move |conn| get_user_by_id(conn, id)).await
    }

    async fn get_or_create_user(
        &self,
        telegram_id: i64,
        username: Option<&str>,
        full_name: Option<&str>,
    ) -> AppResult<User> {
        let username = username.map(str::to_owned);
        let full_name = full_name.map(str::to_owned);
        self.run(move |conn| {
            get_or_create_user(conn, telegram_id, username.as_deref(), full_name.as_deref(), Utc::now())
        })
        .await
    }

    async fn start_trial(&self, user_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
        self.run(move |conn| start_trial(conn, user_id, start, end)).await
    }

    async fn set_paid_until(&self, user_id: i64, paid_until: DateTime<Utc>) -> AppResult<()> {
        self.run(move |conn| set_paid_until(conn, user_id, paid_until)).await
    }

    async fn add_eater_profile(&self, profile: NewEaterProfile) -> AppResult<EaterProfile> {
        self.run(move |conn| add_eater_profile(conn, &profile)).await
    }

    async fn list_eater_profiles(&self, user_id: i64) -> AppResult<Vec<EaterProfile>> {
        self.run(move |conn| list_eater_profiles(conn, user_id)).await
    }

    async fn delete_eater_profile(&self, id: i64) -> AppResult<bool> {
        self.run(move |conn| delete_eater_profile(conn, id)).await
    }

    async fn create_menu(&self, menu: NewMenu) -> AppResult<Menu> {
        self.run(move |conn| create_menu(conn, &menu, Utc::now())).await
    }

    async fn get_menu(&self, id: i64) -> AppResult<Option<Menu>> {
        self.run(move |conn| get_menu(conn, id)).await
    }

    async fn list_menus(&self, user_id: i64) -> AppResult<Vec<Menu>> {
        self.run(move |conn| list_menus(conn, user_id)).await
    }

    async fn set_menu_status(&self, id: i64, status: MenuStatus) -> AppResult<()> {
        self.run(move |conn| set_menu_status(conn, id, status)).await
    }

    async fn create_payment(&self, payment: NewPayment) -> AppResult<Payment> {
        self.run(move |conn| create_payment(conn, &payment, Utc::now())).await
    }

    async fn get_payment(&self, id: i64) -> AppResult<Option<Payment>> {
        self.run(move |conn| get_payment(conn, id)).await
    }

    async fn set_payment_status(
        &self,
        id: i64,
        status: PaymentStatus,
        provider_payment_id: Option<&str>,
    ) -> AppResult<()> {
        let provider_payment_id = provider_payment_id.map(str::to_owned);
        self.run(move |conn| set_payment_status(conn, id, status, provider_payment_id.as_deref()))
            .await
    }

    async fn list_payments(&self, user_id: i64) -> AppResult<Vec<Payment>> {
        self.run(move |conn| list_payments(conn, user_id)).await
    }

    async fn complete_payment(
        &self,
        id: i64,
        provider_payment_id: Option<&str>,
        now: DateTime<Utc>,
        period_days: i64,
    ) -> AppResult<PaymentCompletion> {
        let provider_payment_id = provider_payment_id.map(str::to_owned);
        self.run(move |conn| complete_payment(conn, id, provider_payment_id.as_deref(), now, period_days))
            .await
    }

    async fn close(&self) {
        // r2d2 closes idle connections when the last pool handle drops
        let state = self.pool.state();
        log::info!(
            "Closing SQLite storage ({} connections, {} idle)",
            state.connections,
            state.idle_connections
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn make_conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&mut conn).unwrap();
        conn
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    // ── users ────────────────────────────────────────────────────────────────

    #[test]
    fn new_user_starts_free_without_timestamps() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 42, Some("alice"), Some("Alice A."), now()).unwrap();

        assert_eq!(user.telegram_id, 42);
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.plan, Plan::Free);
        assert_eq!(user.trial_start, None);
        assert_eq!(user.trial_end, None);
        assert_eq!(user.paid_until, None);
        assert_eq!(user.created_at, now());
    }

    #[test]
    fn get_or_create_is_idempotent_and_keeps_existing_row() {
        let conn = make_conn();
        let first = get_or_create_user(&conn, 42, Some("alice"), None, now()).unwrap();
        let second = get_or_create_user(&conn, 42, Some("renamed"), Some("Other"), now()).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("alice"));
        assert_eq!(second.full_name, None);
    }

    #[test]
    fn missing_user_is_none() {
        let conn = make_conn();
        assert!(get_user(&conn, 7).unwrap().is_none());
        assert!(get_user_by_id(&conn, 7).unwrap().is_none());
    }

    #[test]
    fn trial_and_paid_updates_persist() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let end = now() + ChronoDuration::days(10);

        start_trial(&conn, user.id, now(), end).unwrap();
        let user = get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(user.plan, Plan::Trial);
        assert_eq!(user.trial_start, Some(now()));
        assert_eq!(user.trial_end, Some(end));

        let until = now() + ChronoDuration::days(30);
        set_paid_until(&conn, user.id, until).unwrap();
        let user = get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(user.plan, Plan::Paid);
        assert_eq!(user.paid_until, Some(until));
        // Trial fields are kept as history
        assert_eq!(user.trial_end, Some(end));
    }

    #[test]
    fn inverted_trial_window_is_rejected() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let err = start_trial(&conn, user.id, now(), now() - ChronoDuration::days(1)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn updates_on_unknown_user_are_not_found() {
        let conn = make_conn();
        assert!(matches!(set_paid_until(&conn, 99, now()), Err(AppError::NotFound(_))));
        assert!(matches!(start_trial(&conn, 99, now(), now()), Err(AppError::NotFound(_))));
    }

    #[test]
    fn unknown_stored_plan_reads_as_free() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        conn.execute("UPDATE users SET plan = 'premium' WHERE id = ?1", params![user.id])
            .unwrap();
        assert_eq!(get_user(&conn, 1).unwrap().unwrap().plan, Plan::Free);
    }

    // ── profiles ─────────────────────────────────────────────────────────────

    #[test]
    fn eater_profiles_are_listed_per_user() {
        let conn = make_conn();
        let alice = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let bob = get_or_create_user(&conn, 2, None, None, now()).unwrap();

        let kid = add_eater_profile(
            &conn,
            &NewEaterProfile {
                user_id: alice.id,
                name: Some("Kid".to_string()),
                age: Some(7),
                preferences: Some("no fish".to_string()),
            },
        )
        .unwrap();
        add_eater_profile(
            &conn,
            &NewEaterProfile {
                user_id: bob.id,
                ..Default::default()
            },
        )
        .unwrap();

        let profiles = list_eater_profiles(&conn, alice.id).unwrap();
        assert_eq!(profiles, vec![kid.clone()]);

        assert!(delete_eater_profile(&conn, kid.id).unwrap());
        assert!(!delete_eater_profile(&conn, kid.id).unwrap());
        assert!(list_eater_profiles(&conn, alice.id).unwrap().is_empty());
    }

    #[test]
    fn profile_for_missing_user_violates_foreign_key() {
        let conn = make_conn();
        let err = add_eater_profile(
            &conn,
            &NewEaterProfile {
                user_id: 12345,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }

    // ── menus ────────────────────────────────────────────────────────────────

    #[test]
    fn menu_json_columns_survive_storage() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();

        let mut new_menu = NewMenu::new(user.id, "vegetarian");
        new_menu.num_people = 3;
        new_menu.num_days = 2;
        new_menu.meals_per_day = json!(["breakfast", "dinner"]);
        new_menu.content = json!({"day1": {"breakfast": "oatmeal"}});
        new_menu.shopping_list = Some(json!(["oats", "milk"]));

        let menu = create_menu(&conn, &new_menu, now()).unwrap();
        assert_eq!(menu.status, MenuStatus::Draft);
        assert_eq!(menu.meals_per_day, json!(["breakfast", "dinner"]));
        assert_eq!(menu.shopping_list, Some(json!(["oats", "milk"])));

        set_menu_status(&conn, menu.id, MenuStatus::Confirmed).unwrap();
        let stored = get_menu(&conn, menu.id).unwrap().unwrap();
        assert_eq!(stored.status, MenuStatus::Confirmed);
        assert_eq!(stored.content, json!({"day1": {"breakfast": "oatmeal"}}));
    }

    #[test]
    fn menus_are_listed_newest_first() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let older = create_menu(&conn, &NewMenu::new(user.id, "keto"), now()).unwrap();
        let newer = create_menu(&conn, &NewMenu::new(user.id, "vegan"), now() + ChronoDuration::hours(1)).unwrap();

        let ids: Vec<i64> = list_menus(&conn, user.id).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn invalid_menu_is_rejected_before_insert() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let mut menu = NewMenu::new(user.id, "keto");
        menu.num_people = 0;
        assert!(matches!(create_menu(&conn, &menu, now()), Err(AppError::Validation(_))));
        assert!(list_menus(&conn, user.id).unwrap().is_empty());
    }

    // ── payments ─────────────────────────────────────────────────────────────

    fn pending_payment(conn: &Connection, user_id: i64) -> Payment {
        create_payment(
            conn,
            &NewPayment {
                user_id,
                amount: 299.0,
                currency: "RUB".to_string(),
                payment_id: None,
            },
            now(),
        )
        .unwrap()
    }

    #[test]
    fn payment_starts_pending_and_status_updates() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let payment = pending_payment(&conn, user.id);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.currency, "RUB");

        set_payment_status(&conn, payment.id, PaymentStatus::Failed, Some("prov-1")).unwrap();
        let stored = get_payment(&conn, payment.id).unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.payment_id.as_deref(), Some("prov-1"));

        // A missing provider ID keeps the stored one
        set_payment_status(&conn, payment.id, PaymentStatus::Pending, None).unwrap();
        let stored = get_payment(&conn, payment.id).unwrap().unwrap();
        assert_eq!(stored.payment_id.as_deref(), Some("prov-1"));

        assert_eq!(list_payments(&conn, user.id).unwrap().len(), 1);
    }

    #[test]
    fn successful_payment_status_is_final() {
        let mut conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let payment = pending_payment(&conn, user.id);
        complete_payment(&mut conn, payment.id, Some("prov-1"), now(), 30).unwrap();

        let err = set_payment_status(&conn, payment.id, PaymentStatus::Failed, Some("late")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let stored = get_payment(&conn, payment.id).unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Success);
        assert_eq!(stored.payment_id.as_deref(), Some("prov-1"));

        assert!(matches!(
            set_payment_status(&conn, 404, PaymentStatus::Failed, None),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn complete_payment_updates_user_once() {
        let mut conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let payment = pending_payment(&conn, user.id);
        let until = now() + ChronoDuration::days(30);

        assert_eq!(
            complete_payment(&mut conn, payment.id, Some("prov-9"), now(), 30).unwrap(),
            PaymentCompletion::Applied { paid_until: until }
        );
        assert_eq!(
            complete_payment(&mut conn, payment.id, None, now() + ChronoDuration::days(1), 30).unwrap(),
            PaymentCompletion::AlreadyApplied {
                paid_until: Some(until)
            }
        );

        let user = get_user(&conn, 1).unwrap().unwrap();
        assert_eq!(user.plan, Plan::Paid);
        assert_eq!(user.paid_until, Some(until));
        let payment = get_payment(&conn, payment.id).unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Success);
        assert_eq!(payment.payment_id.as_deref(), Some("prov-9"));
    }

    #[test]
    fn complete_payment_extends_from_stored_expiry() {
        let mut conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let first = pending_payment(&conn, user.id);
        let second = pending_payment(&conn, user.id);

        complete_payment(&mut conn, first.id, None, now(), 30).unwrap();
        assert_eq!(
            complete_payment(&mut conn, second.id, None, now(), 30).unwrap(),
            PaymentCompletion::Applied {
                paid_until: now() + ChronoDuration::days(60)
            }
        );
    }

    #[test]
    fn complete_unknown_payment_is_not_found() {
        let mut conn = make_conn();
        assert!(matches!(
            complete_payment(&mut conn, 404, None, now(), 30),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn unknown_menu_status_is_a_decode_error() {
        let conn = make_conn();
        let user = get_or_create_user(&conn, 1, None, None, now()).unwrap();
        let menu = create_menu(&conn, &NewMenu::new(user.id, "keto"), now()).unwrap();
        conn.execute("UPDATE menus SET status = 'archived' WHERE id = ?1", params![menu.id])
            .unwrap();

        assert!(matches!(get_menu(&conn, menu.id), Err(AppError::Database(_))));
    }

    // ── async wrapper ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sqlite_storage_opens_file_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("menu.db");
        let storage = SqliteStorage::open(path.to_str().unwrap()).await.unwrap();

        let user = storage.get_or_create_user(5, Some("eve"), None).await.unwrap();
        let again = storage.get_user(5).await.unwrap().unwrap();
        assert_eq!(user.id, again.id);
        assert_eq!(storage.backend_name(), "sqlite");

        storage.close().await;
    }

    async fn file_storage(dir: &tempfile::TempDir) -> Arc<SqliteStorage> {
        let path = dir.path().join("payments.db");
        Arc::new(SqliteStorage::open(path.to_str().unwrap()).await.unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_completions_each_extend_the_period() {
        let dir = tempfile::tempdir().unwrap();
        let storage = file_storage(&dir).await;
        let user = storage.get_or_create_user(1, None, None).await.unwrap();

        let mut payment_ids = Vec::new();
        for _ in 0..4 {
            let payment = storage
                .create_payment(NewPayment {
                    user_id: user.id,
                    amount: 299.0,
                    currency: "RUB".to_string(),
                    payment_id: None,
                })
                .await
                .unwrap();
            payment_ids.push(payment.id);
        }

        let barrier = Arc::new(Barrier::new(payment_ids.len()));
        let handles: Vec<_> = payment_ids
            .iter()
            .map(|&id| {
                let storage = Arc::clone(&storage);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    storage.complete_payment(id, None, now(), 30).await.unwrap()
                })
            })
            .collect();

        let mut granted = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                PaymentCompletion::Applied { paid_until } => granted.push(paid_until),
                other => panic!("unexpected {other:?}"),
            }
        }
        granted.sort();
        let expected: Vec<_> = (1..=4).map(|n| now() + ChronoDuration::days(30 * n)).collect();
        assert_eq!(granted, expected);

        let user = storage.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.paid_until, Some(now() + ChronoDuration::days(120)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn replayed_completion_is_applied_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = file_storage(&dir).await;
        let user = storage.get_or_create_user(1, None, None).await.unwrap();
        let payment = storage
            .create_payment(NewPayment {
                user_id: user.id,
                amount: 299.0,
                currency: "RUB".to_string(),
                payment_id: None,
            })
            .await
            .unwrap();

        let barrier = Arc::new(Barrier::new(6));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    storage.complete_payment(payment.id, Some("prov-1"), now(), 30).await
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            // Every replay resolves cleanly; none surfaces a lock error
            match handle.await.unwrap().unwrap() {
                PaymentCompletion::Applied { .. } => applied += 1,
                PaymentCompletion::AlreadyApplied { paid_until } => {
                    assert_eq!(paid_until, Some(now() + ChronoDuration::days(30)));
                }
            }
        }
        assert_eq!(applied, 1);

        let user = storage.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.paid_until, Some(now() + ChronoDuration::days(30)));
    }
}
