//! Key-value TTL cache port.
//!
//! The core only sees this trait; production wires it to Redis or similar,
//! tests and single-node deployments use [`InMemoryCache`]. Values are
//! opaque bytes; callers pick the encoding (bincode for matrices, JSON for
//! reference data).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;

/// Bytes store with per-key TTL, bulk ops and prefix invalidation.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// One result slot per requested key, in order.
    async fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>>;

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>, Duration)>);

    /// Delete every key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> usize;
}

/// In-process cache over a concurrent map. Expiry is checked on read and
/// reclaimed by [`InMemoryCache::spawn_sweeper`].
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl InMemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn is_live(&self, entry: &CacheEntry) -> bool {
        entry.expires_at > self.clock.now()
    }

    /// Drop expired entries. Called by the sweeper; also usable directly in
    /// tests.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Background TTL sweeper; stops when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let dropped = cache.sweep();
                        if dropped > 0 {
                            debug!(dropped, "cache sweeper reclaimed expired entries");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entry = self.entries.get(key)?;
        if self.is_live(&entry) {
            Some(entry.value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let expires_at = self.clock.now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        self.entries.insert(key.to_string(), CacheEntry { value, expires_at });
    }

    async fn multi_get(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await);
        }
        out
    }

    async fn multi_set(&self, entries: Vec<(String, Vec<u8>, Duration)>) {
        for (key, value, ttl) in entries {
            self.set(&key, value, ttl).await;
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        before - self.entries.len()
    }
}
