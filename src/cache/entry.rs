//! In-memory cache entry and its on-disk counterpart.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What actually lives on disk: the value plus its expiry timestamps.
/// Access bookkeeping (`last_access`, insertion order) is memory-only and
/// rebuilt fresh whenever an entry is loaded or re-created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    /// The cached value.
    pub value: Value,
    /// Epoch milliseconds after which the entry is no longer fresh.
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
    /// Epoch milliseconds after which a stale entry may no longer be
    /// served at all (absent when stale-while-revalidate is off for this
    /// entry).
    #[serde(rename = "staleUntil", skip_serializing_if = "Option::is_none")]
    pub stale_until: Option<i64>,
}

/// An entry held in the in-memory map.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached value.
    pub value: Value,
    /// Epoch milliseconds after which the entry is no longer fresh.
    pub expires_at: i64,
    /// Epoch milliseconds after which a stale entry may no longer be served.
    pub stale_until: Option<i64>,
    /// Last time this entry was read or written, used for LRU ordering.
    pub last_access: Instant,
    /// Monotonic insertion counter, used to break `last_access` ties in
    /// favor of evicting whichever of two equally-stale entries arrived
    /// first.
    pub insertion_seq: u64,
    /// Namespace this entry was stored under, kept for persistence paths.
    pub namespace: String,
    /// Hex key hash, kept for persistence paths and eviction logging.
    pub key_hash: String,
}

impl CacheEntry {
    /// Whether this entry is still fresh at `now` (epoch millis).
    #[must_use]
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now
    }

    /// Whether this entry is stale but still within its SWR grace window.
    #[must_use]
    pub fn is_stale_but_servable(&self, now: i64) -> bool {
        !self.is_fresh(now) && self.stale_until.is_some_and(|until| until > now)
    }

    /// Project this entry into its on-disk shape.
    #[must_use]
    pub fn to_persisted(&self) -> PersistedEntry {
        PersistedEntry {
            value: self.value.clone(),
            expires_at: self.expires_at,
            stale_until: self.stale_until,
        }
    }

    /// Build a fresh in-memory entry from a loaded persisted one.
    #[must_use]
    pub fn from_persisted(namespace: String, key_hash: String, persisted: PersistedEntry, insertion_seq: u64) -> Self {
        Self {
            value: persisted.value,
            expires_at: persisted.expires_at,
            stale_until: persisted.stale_until,
            last_access: Instant::now(),
            insertion_seq,
            namespace,
            key_hash,
        }
    }
}

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
