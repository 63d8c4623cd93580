// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Serialization failed for '{key}': {reason}")]
    Serialization {
        key: String,
        reason: String,
    },
}

/// Durable key/value persistence surface.
///
/// The engine keeps its cache rows, the pending action list, sync bookkeeping
/// and conflict records here. Keys are namespaced by prefix (`cache:`,
/// `queue:`, `sync:`, `conflict:`) so a single backend can hold all of them.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All `(key, value)` pairs whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// Delete a set of keys.
    /// Default implementation falls back to sequential deletes.
    async fn delete_batch(&self, keys: &[String]) -> Result<usize, StorageError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }
}
