//! Durable cache of film-database lookups.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, info, warn};

use super::unix_now;
use crate::error::Result;
use crate::types::{EnrichedRecord, MediaKind};

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total: i64,
    pub by_query_kind: Vec<(String, i64)>,
    pub payload_bytes: i64,
}

/// Lookup cache keyed by `(query_kind, query_text, query_year)`.
///
/// Rows expire by last access, not creation, so titles that keep arriving
/// stay warm indefinitely.
#[derive(Debug)]
pub struct MetadataCache {
    pool: SqlitePool,
    expire_days: u32,
}

impl MetadataCache {
    pub async fn open(pool: SqlitePool, expire_days: u32) -> Result<Self> {
        let cache = Self { pool, expire_days };
        cache.create_tables().await?;
        Ok(cache)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tmdb_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_kind TEXT NOT NULL,
                query_text TEXT NOT NULL,
                query_year INTEGER,
                external_id INTEGER NOT NULL,
                media_kind TEXT NOT NULL,
                canonical_title TEXT NOT NULL,
                release_year INTEGER,
                genres TEXT,
                genre_ids TEXT,
                payload TEXT NOT NULL,
                created_time INTEGER NOT NULL,
                last_accessed_time INTEGER NOT NULL,
                UNIQUE(query_kind, query_text, query_year)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_query ON tmdb_cache(query_kind, query_text, query_year)",
            "CREATE INDEX IF NOT EXISTS idx_access_time ON tmdb_cache(last_accessed_time)",
            "CREATE INDEX IF NOT EXISTS idx_cache_external_id ON tmdb_cache(external_id)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Fetch a cached record, touching its last-accessed time on hit.
    ///
    /// A `None` year matches any stored year for the query text, mirroring
    /// how series lookups are keyed without one.
    pub async fn get(
        &self,
        kind: &str,
        text: &str,
        year: Option<i32>,
    ) -> Result<Option<EnrichedRecord>> {
        let row = if let Some(year) = year {
            sqlx::query(
                r#"
                SELECT id, external_id, media_kind, canonical_title, release_year,
                       genres, genre_ids, payload
                FROM tmdb_cache
                WHERE query_kind = ? AND query_text = ? AND query_year = ?
                "#,
            )
            .bind(kind)
            .bind(text)
            .bind(year)
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                SELECT id, external_id, media_kind, canonical_title, release_year,
                       genres, genre_ids, payload
                FROM tmdb_cache
                WHERE query_kind = ? AND query_text = ?
                "#,
            )
            .bind(kind)
            .bind(text)
            .fetch_optional(&self.pool)
            .await?
        };

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row.get("id");
        sqlx::query("UPDATE tmdb_cache SET last_accessed_time = ? WHERE id = ?")
            .bind(unix_now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        let kind_raw: String = row.get("media_kind");
        let Some(media_kind) = MediaKind::parse(&kind_raw) else {
            warn!(media_kind = %kind_raw, "unparseable media kind in cache row, treating as miss");
            return Ok(None);
        };

        let record = EnrichedRecord {
            external_id: row.get("external_id"),
            media_kind,
            title: row.get("canonical_title"),
            release_year: row.get("release_year"),
            genres: parse_json_list(row.get::<Option<String>, _>("genres")),
            genre_ids: parse_json_list(row.get::<Option<String>, _>("genre_ids")),
            payload: serde_json::from_str(&row.get::<String, _>("payload"))
                .unwrap_or(serde_json::Value::Null),
        };

        debug!(kind, text, "metadata cache hit");
        Ok(Some(record))
    }

    /// Insert or replace the cached record for a query key.
    pub async fn set(
        &self,
        kind: &str,
        text: &str,
        year: Option<i32>,
        record: &EnrichedRecord,
    ) -> Result<()> {
        let now = unix_now();
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tmdb_cache
            (query_kind, query_text, query_year, external_id, media_kind, canonical_title,
             release_year, genres, genre_ids, payload, created_time, last_accessed_time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind)
        .bind(text)
        .bind(year)
        .bind(record.external_id)
        .bind(record.media_kind.as_str())
        .bind(&record.title)
        .bind(record.release_year)
        .bind(serde_json::to_string(&record.genres)?)
        .bind(serde_json::to_string(&record.genre_ids)?)
        .bind(serde_json::to_string(&record.payload)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(kind, text, animation = record.is_animation(), "metadata cached");
        Ok(())
    }

    /// Remove rows whose last access is beyond the TTL.
    pub async fn purge_expired(&self) -> Result<u64> {
        let cutoff = unix_now() - i64::from(self.expire_days) * 86_400;
        let result = sqlx::query("DELETE FROM tmdb_cache WHERE last_accessed_time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(removed, "purged expired metadata cache rows");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        let total = sqlx::query("SELECT COUNT(*) AS n FROM tmdb_cache")
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("n");

        let by_query_kind = sqlx::query(
            "SELECT query_kind, COUNT(*) AS n FROM tmdb_cache GROUP BY query_kind",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| (row.get::<String, _>("query_kind"), row.get::<i64, _>("n")))
        .collect();

        let payload_bytes = sqlx::query("SELECT COALESCE(SUM(LENGTH(payload)), 0) AS n FROM tmdb_cache")
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("n");

        Ok(CacheStats {
            total,
            by_query_kind,
            payload_bytes,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_json_list<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Vec<T> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}
