//! Memoization of generated paths per metric fingerprint
//!
//! Entries expire after their TTL; expired entries are invisible to readers
//! and are removed by a periodic purge task. The cache is not tied to a
//! configuration generation: after a rule reload, paths computed with the
//! previous rules keep being served until they expire.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::model::Fingerprint;

#[derive(Debug, Clone)]
struct CacheEntry {
    paths: Vec<String>,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct PathCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    default_ttl: Duration,
    purge_interval: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PathCache {
    pub fn new(default_ttl: Duration, purge_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            purge_interval,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn purge_interval(&self) -> Duration {
        self.purge_interval
    }

    /// Cached paths for `fingerprint`, unless absent or expired.
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Vec<String>> {
        let entries = self.entries.read();
        match entries.get(&fingerprint) {
            Some(entry) if entry.expires_at > Instant::now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%fingerprint, "Paths cache hit");
                Some(entry.paths.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%fingerprint, "Paths cache miss");
                None
            }
        }
    }

    /// Store `paths`, replacing any previous entry and restarting its TTL.
    pub fn set(&self, fingerprint: Fingerprint, paths: Vec<String>, ttl: Duration) {
        let entry = CacheEntry {
            paths,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(fingerprint, entry);
    }

    /// Store `paths` with the default TTL.
    pub fn insert(&self, fingerprint: Fingerprint, paths: Vec<String>) {
        self.set(fingerprint, paths, self.default_ttl);
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of stored entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Spawn the periodic purge on the current tokio runtime.
    ///
    /// The task holds a weak reference and ends once the cache is dropped.
    pub fn start_purge(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let purge_interval = self.purge_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(purge_interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, remaining = cache.len(), "Purged expired paths");
                }
            }
        })
    }
}
