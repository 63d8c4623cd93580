//! Cache entry data structure.

use serde::{Deserialize, Serialize};
use super::codec::StoredPayload;

/// Fixed per-entry accounting overhead on top of key and payload bytes.
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// One cached value, owned by the cache store.
///
/// `expires_at = created_at + strategy ttl`; the entry is live while
/// `now < expires_at`. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: StoredPayload,
    pub strategy_name: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub size_bytes: usize,
    pub access_count: u64,
    pub last_accessed_at: i64,
}

impl CacheEntry {
    pub fn new(key: String, payload: StoredPayload, strategy_name: String, now: i64, ttl_millis: i64) -> Self {
        let size_bytes = Self::compute_size(&key, &payload);
        Self {
            key,
            payload,
            strategy_name,
            created_at: now,
            expires_at: now.saturating_add(ttl_millis),
            size_bytes,
            access_count: 0,
            last_accessed_at: now,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }

    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        !self.is_live(now)
    }

    pub fn record_access(&mut self, now: i64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
    }

    /// Age since creation in milliseconds.
    #[must_use]
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at).max(0)
    }

    fn compute_size(key: &str, payload: &StoredPayload) -> usize {
        ENTRY_OVERHEAD_BYTES + key.len() + payload.encoded_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(ttl_millis: i64) -> CacheEntry {
        let payload = StoredPayload::encode(&json!({"overall": 80}), false).unwrap();
        CacheEntry::new("player:a@x.com".into(), payload, "players".into(), 1_000, ttl_millis)
    }

    #[test]
    fn test_expiry_boundary() {
        let e = entry(500);
        assert_eq!(e.expires_at, 1_500);
        assert!(e.is_live(1_499));
        assert!(e.is_expired(1_500));
    }

    #[test]
    fn test_record_access() {
        let mut e = entry(500);
        e.record_access(1_200);
        e.record_access(1_300);
        assert_eq!(e.access_count, 2);
        assert_eq!(e.last_accessed_at, 1_300);
    }

    #[test]
    fn test_size_includes_key_and_payload() {
        let e = entry(500);
        assert!(e.size_bytes > "player:a@x.com".len() + ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_serialize_roundtrip_preserves_timestamps() {
        let e = entry(500);
        let bytes = serde_json::to_vec(&e).unwrap();
        let back: CacheEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, e);
    }
}
