//! Deterministic LRU response cache with TTL.
//!
//! Keys are SHA-256 digests of normalized request parameters in sorted
//! order. The first completed write for a key wins, and later writes for a
//! live key are ignored.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Collapse whitespace and lowercase free text so equivalent requests share a key.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builder for a stable cache key.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    namespace: String,
    fields: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> String {
        let joined = self
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("|");
        let digest = Sha256::digest(format!("{}|{}", self.namespace, joined).as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{}:{}", self.namespace, hex)
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// Hit/miss counters for one pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// A bounded, TTL-aware memo table shared by the tasks of one run.
#[derive(Debug)]
pub struct ResponseCache<V> {
    name: &'static str,
    enabled: bool,
    ttl: Duration,
    inner: Mutex<LruCache<String, Entry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(name: &'static str, capacity: usize, ttl: Duration, enabled: bool) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            enabled,
            ttl,
            inner: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let lookup = inner
            .get(key)
            .map(|entry| (entry.stored_at.elapsed() < self.ttl).then(|| entry.value.clone()));
        let live = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                inner.pop(key);
                None
            }
            None => None,
        };
        match live {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(pool = self.name, "Cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(pool = self.name, "Cache miss");
                None
            }
        }
    }

    /// Store `value` unless a live entry already exists. Returns whether it was stored.
    pub fn insert(&self, key: String, value: V) -> bool {
        if !self.enabled {
            return false;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner.peek(&key) {
            if existing.stored_at.elapsed() < self.ttl {
                return false;
            }
        }
        inner.put(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
        true
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: inner.len(),
        }
    }
}
