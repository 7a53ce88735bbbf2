//! SQLite-backed [`CacheStore`].
//!
//! One row per artifact path holding the fingerprint columns and the
//! record serialized as JSON. The database runs in WAL mode so a reader
//! (`arx cache stats`) never blocks a run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::store::{CacheStore, StoreSummary};
use crate::error::CacheStoreError;
use crate::models::{ArtifactRecord, CacheEntry, Fingerprint};

pub struct SqliteCacheStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteCacheStore {
    /// Open (creating if needed) the cache database and ensure its schema.
    pub async fn open(path: &Path) -> Result<Self, CacheStoreError> {
        let pool = connect(path).await?;
        migrate(&pool).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn connect(db_path: &Path) -> Result<SqlitePool, CacheStoreError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> Result<(), CacheStoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifact_cache (
            path TEXT PRIMARY KEY,
            size INTEGER NOT NULL,
            mtime_ns INTEGER NOT NULL,
            content_hash TEXT,
            format TEXT NOT NULL,
            status TEXT NOT NULL,
            record_json TEXT NOT NULL,
            cached_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_artifact_cache_format ON artifact_cache(format)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, path: &str) -> Result<Option<CacheEntry>, CacheStoreError> {
        let row = sqlx::query(
            "SELECT size, mtime_ns, content_hash, record_json, cached_at FROM artifact_cache WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let size: i64 = row.try_get("size")?;
        let mtime_ns: i64 = row.try_get("mtime_ns")?;
        let content_hash: Option<String> = row.try_get("content_hash")?;
        let record_json: String = row.try_get("record_json")?;
        let cached_at: String = row.try_get("cached_at")?;

        let record: ArtifactRecord = serde_json::from_str(&record_json)?;
        let fingerprint = Fingerprint {
            path: path.to_string(),
            size: size.max(0) as u64,
            mtime_ns,
            content_hash,
        };
        let cached_at = DateTime::parse_from_rfc3339(&cached_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(CacheEntry {
            fingerprint,
            record: Arc::new(record),
            cached_at,
        }))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheStoreError> {
        let record_json = serde_json::to_string(entry.record.as_ref())?;
        sqlx::query(
            r#"
            INSERT INTO artifact_cache (path, size, mtime_ns, content_hash, format, status,
                                        record_json, cached_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                size = excluded.size,
                mtime_ns = excluded.mtime_ns,
                content_hash = excluded.content_hash,
                format = excluded.format,
                status = excluded.status,
                record_json = excluded.record_json,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&entry.fingerprint.path)
        .bind(entry.fingerprint.size as i64)
        .bind(entry.fingerprint.mtime_ns)
        .bind(&entry.fingerprint.content_hash)
        .bind(entry.record.format.as_str())
        .bind(entry.record.status.as_str())
        .bind(&record_json)
        .bind(entry.cached_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<u64, CacheStoreError> {
        let result = sqlx::query("DELETE FROM artifact_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn summary(&self) -> Result<StoreSummary, CacheStoreError> {
        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifact_cache")
            .fetch_one(&self.pool)
            .await?;

        let mut summary = StoreSummary {
            entries: entries.max(0) as u64,
            ..Default::default()
        };

        let rows = sqlx::query(
            "SELECT format, COUNT(*) AS n FROM artifact_cache GROUP BY format ORDER BY format",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let format: String = row.try_get("format")?;
            let n: i64 = row.try_get("n")?;
            summary.by_format.insert(format, n.max(0) as u64);
        }

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM artifact_cache GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            summary.by_status.insert(status, n.max(0) as u64);
        }

        summary.bytes_on_disk = std::fs::metadata(&self.path).map(|m| m.len()).ok();
        Ok(summary)
    }
}
