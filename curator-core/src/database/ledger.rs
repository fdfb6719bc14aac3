//! Durable record of already-published files.

use std::path::{Path, PathBuf};

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, info};

use super::unix_now;
use crate::error::Result;

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_file_path ON processed_files(file_path)",
    "CREATE INDEX IF NOT EXISTS idx_file_digest ON processed_files(file_digest)",
    "CREATE INDEX IF NOT EXISTS idx_processed_time ON processed_files(processed_time)",
    "CREATE INDEX IF NOT EXISTS idx_external_id ON processed_files(external_id)",
];

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub file_path: String,
    pub file_digest: Option<String>,
    pub file_size: i64,
    pub processed_time: i64,
    pub external_id: Option<i64>,
    pub media_kind: Option<String>,
    pub target_path: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerStats {
    pub total: i64,
    pub by_media_kind: Vec<(String, i64)>,
    pub database_size_bytes: u64,
    pub processed_last_24h: i64,
}

/// Processed-file ledger. `file_path` is the primary dedup key; when digests
/// are enabled `(file_path, file_digest)` gives the stronger check.
#[derive(Debug)]
pub struct ProcessedFilesDb {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl ProcessedFilesDb {
    /// Create the schema if needed and run the digest-nullability migration.
    pub async fn open(pool: SqlitePool, db_path: impl Into<PathBuf>) -> Result<Self> {
        let db = Self {
            pool,
            db_path: db_path.into(),
        };
        db.create_tables().await?;
        db.migrate_digest_nullability().await?;
        Ok(db)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT UNIQUE NOT NULL,
                file_digest TEXT,
                file_size INTEGER NOT NULL,
                processed_time INTEGER NOT NULL,
                external_id INTEGER,
                media_kind TEXT,
                target_path TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in INDEXES {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Legacy deployments created `file_digest` as NOT NULL, which breaks
    /// digest-less operation. Detect that via column metadata and rebuild the
    /// table through a temporary copy inside one transaction so a crash
    /// leaves either the old or the new table, never neither.
    async fn migrate_digest_nullability(&self) -> Result<()> {
        let columns = sqlx::query("PRAGMA table_info(processed_files)")
            .fetch_all(&self.pool)
            .await?;

        let digest_not_null = columns.iter().any(|row| {
            row.get::<String, _>("name") == "file_digest" && row.get::<i64, _>("notnull") == 1
        });

        if !digest_not_null {
            return Ok(());
        }

        info!("file_digest column carries NOT NULL, rebuilding ledger table");

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            CREATE TABLE processed_files_migrated (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT UNIQUE NOT NULL,
                file_digest TEXT,
                file_size INTEGER NOT NULL,
                processed_time INTEGER NOT NULL,
                external_id INTEGER,
                media_kind TEXT,
                target_path TEXT
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO processed_files_migrated
            SELECT id, file_path, file_digest, file_size, processed_time,
                   external_id, media_kind, target_path
            FROM processed_files
            "#,
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("DROP TABLE processed_files")
            .execute(&mut *tx)
            .await?;
        sqlx::query("ALTER TABLE processed_files_migrated RENAME TO processed_files")
            .execute(&mut *tx)
            .await?;
        for index in INDEXES {
            sqlx::query(index).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("ledger table rebuilt");
        Ok(())
    }

    /// Whether `path` (optionally narrowed by digest) is already published.
    pub async fn is_processed(
        &self,
        path: &Path,
        digest: Option<&str>,
        use_digest: bool,
    ) -> Result<bool> {
        let path_str = path.to_string_lossy();
        let row = if use_digest && digest.is_some() {
            sqlx::query("SELECT 1 FROM processed_files WHERE file_path = ? AND file_digest = ?")
                .bind(path_str.as_ref())
                .bind(digest)
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT 1 FROM processed_files WHERE file_path = ?")
                .bind(path_str.as_ref())
                .fetch_optional(&self.pool)
                .await?
        };

        let hit = row.is_some();
        debug!(path = %path.display(), hit, "ledger lookup");
        Ok(hit)
    }

    /// Record a successful publish. Replaces any prior row for the path.
    #[allow(clippy::too_many_arguments)]
    pub async fn add(
        &self,
        path: &Path,
        size: u64,
        digest: Option<&str>,
        external_id: Option<i64>,
        media_kind: Option<&str>,
        target_path: Option<&Path>,
        use_digest: bool,
    ) -> Result<()> {
        let stored_digest = if use_digest { digest } else { None };
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO processed_files
            (file_path, file_digest, file_size, processed_time, external_id, media_kind, target_path)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(path.to_string_lossy().as_ref())
        .bind(stored_digest)
        .bind(size as i64)
        .bind(unix_now())
        .bind(external_id)
        .bind(media_kind)
        .bind(target_path.map(|p| p.to_string_lossy().into_owned()))
        .execute(&self.pool)
        .await?;

        debug!(path = %path.display(), "ledger entry added");
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM processed_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT file_path, file_digest, file_size, processed_time,
                   external_id, media_kind, target_path
            FROM processed_files
            ORDER BY processed_time DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| LedgerEntry {
                file_path: row.get("file_path"),
                file_digest: row.get("file_digest"),
                file_size: row.get("file_size"),
                processed_time: row.get("processed_time"),
                external_id: row.get("external_id"),
                media_kind: row.get("media_kind"),
                target_path: row.get("target_path"),
            })
            .collect())
    }

    /// Drop entries older than `days`. Returns the number removed.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64> {
        let cutoff = unix_now() - i64::from(days) * 86_400;
        let result = sqlx::query("DELETE FROM processed_files WHERE processed_time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, days, "purged old ledger entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        let total = self.count().await?;

        let by_kind = sqlx::query(
            "SELECT media_kind, COUNT(*) AS n FROM processed_files GROUP BY media_kind",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| {
            (
                row.get::<Option<String>, _>("media_kind")
                    .unwrap_or_else(|| "unknown".to_owned()),
                row.get::<i64, _>("n"),
            )
        })
        .collect();

        let day_ago = unix_now() - 86_400;
        let recent_row =
            sqlx::query("SELECT COUNT(*) AS n FROM processed_files WHERE processed_time > ?")
                .bind(day_ago)
                .fetch_one(&self.pool)
                .await?;

        let database_size_bytes = std::fs::metadata(&self.db_path)
            .map(|meta| meta.len())
            .unwrap_or(0);

        Ok(LedgerStats {
            total,
            by_media_kind: by_kind,
            database_size_bytes,
            processed_last_24h: recent_row.get::<i64, _>("n"),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
