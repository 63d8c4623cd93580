// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite persistence backend.
//!
//! A single key/value table keeps every persisted row of the engine:
//!
//! ```sql
//! CREATE TABLE offline_kv (
//!   key TEXT PRIMARY KEY,
//!   value BLOB NOT NULL,
//!   updated_at INTEGER NOT NULL
//! )
//! ```
//!
//! Prefix scans (`cache:`, `queue:` ...) use `substr(key, 1, n)` against the
//! primary key, which keeps the table portable across sqlite builds without
//! relying on `LIKE` escaping.

use async_trait::async_trait;
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use super::traits::{KvStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqliteKvStore {
    pool: AnyPool,
    path: String,
}

impl SqliteKvStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}?mode=rwc", path_str);
        Self::connect(&url, path_str).await
    }

    /// Connect with startup-mode retry (fails fast if the path is unusable).
    async fn connect(url: &str, path: String) -> Result<Self, StorageError> {
        install_drivers();

        let pool = retry("kv_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, path };
        store.enable_wal_mode().await?;
        store.init_schema().await?;
        info!(path = %store.path, "SQLite persistence opened");
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = r#"
            CREATE TABLE IF NOT EXISTS offline_kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#;

        retry("kv_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    /// Count all stored rows.
    pub async fn count_all(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM offline_kv")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let count: i64 = row.try_get("cnt")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(count as u64)
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row = sqlx::query("SELECT value FROM offline_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match row {
            Some(row) => {
                let value: Vec<u8> = row.try_get("value")
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO offline_kv (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
            .bind(key)
            .bind(value.to_vec())
            .bind(crate::time::now_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(key, bytes = value.len(), "Persisted row");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM offline_kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let rows = sqlx::query(
            "SELECT key, value FROM offline_kv WHERE substr(key, 1, ?) = ? ORDER BY key ASC",
        )
            .bind(prefix.chars().count() as i64)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            let value: Vec<u8> = row.try_get("value")
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            out.push((key, value));
        }
        Ok(out)
    }

    async fn delete_batch(&self, keys: &[String]) -> Result<usize, StorageError> {
        if keys.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<&str> = keys.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM offline_kv WHERE key IN ({})",
            placeholders.join(", ")
        );

        retry("kv_delete_batch", &RetryConfig::query(), || {
            let sql = sql.clone();
            let keys = keys.to_vec();
            async move {
                let mut query = sqlx::query(&sql);
                for key in &keys {
                    query = query.bind(key);
                }

                let result = query.execute(&self.pool)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;

                Ok(result.rows_affected() as usize)
            }
        })
        .await
    }
}
