//! Scheduled synchronization of race events and news into local storage.
//!
//! [`scheduler::SyncScheduler`] owns one live timer per active configuration
//! and hands fired runs to [`manager::SyncManager`], which records every run
//! as exactly one terminal [`types::SyncLog`] row.

pub mod cron_expr;
pub mod error;
pub mod manager;
pub mod notify;
pub mod scheduler;
pub mod source;
pub mod source_http;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

use std::time::{SystemTime, UNIX_EPOCH};

pub use {
    error::{Error, Result},
    manager::{SyncManager, SyncRequest},
    scheduler::SyncScheduler,
};

/// Run database migrations for the sync tables.
///
/// Should be called at startup when using [`store_sqlite::SqliteStore::with_pool`]
/// on a shared pool; [`store_sqlite::SqliteStore::new`] runs them itself.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
