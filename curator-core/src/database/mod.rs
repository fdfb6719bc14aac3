//! Durable state: the processed-file ledger and the metadata cache.
//!
//! Both are single-file SQLite databases behind a bounded connection pool
//! configured for WAL journaling, a 5 s busy timeout, foreign keys and a
//! 64 MiB page cache.

mod cache;
mod ledger;

pub use cache::{CacheStats, MetadataCache};
pub use ledger::{LedgerEntry, LedgerStats, ProcessedFilesDb};

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

const MAX_CONNECTIONS: u32 = 10;
const MIN_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (creating if missing) the database at `path` with the standard
/// pragmas and pool bounds.
pub async fn open_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .pragma("cache_size", "-64000");

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .min_connections(MIN_CONNECTIONS)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
