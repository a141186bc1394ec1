use rusqlite::{Connection, TransactionBehavior};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::core::error::AppResult;

mod embedded {
    use refinery::embed_migrations;

    embed_migrations!("./migrations");
}

static MIGRATION_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Applies pending schema migrations to the local database.
///
/// Runs are serialized per process by a lock, and across processes by the
/// SQLite write lock: refinery opens its own transaction for every step, so
/// the connection is switched to `BEGIN IMMEDIATE` for the duration of the run
/// instead of wrapping it in an outer transaction.
pub fn run_migrations(conn: &mut Connection) -> AppResult<()> {
    let mutex = MIGRATION_LOCK.get_or_init(|| Mutex::new(()));
    // Migrations are idempotent, so a lock poisoned by a panicking runner is safe to reuse
    let _guard = match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Migration lock was poisoned, recovering...");
            poisoned.into_inner()
        }
    };

    apply_migrations(conn)
}

fn apply_migrations(conn: &mut Connection) -> AppResult<()> {
    conn.busy_timeout(Duration::from_secs(30))?;
    conn.set_transaction_behavior(TransactionBehavior::Immediate);

    let result = run_once(conn).or_else(|err| {
        // Another process may have applied the same version between our
        // history read and our write; the second pass sees it as applied
        log::warn!("Migration run failed ({}), retrying once", err);
        run_once(conn)
    });

    conn.set_transaction_behavior(TransactionBehavior::Deferred);
    result
}

fn run_once(conn: &mut Connection) -> AppResult<()> {
    let report = embedded::migrations::runner().run(conn)?;
    for migration in report.applied_migrations() {
        log::info!("Applied migration {}", migration);
    }
    Ok(())
}
