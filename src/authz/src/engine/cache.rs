//! Decision cache keyed by BLAKE3 hashes of `(subject, action, value)`

use blake3::Hasher;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::types::Context;

/// Cache configuration
///
/// The default keeps every decision for the lifetime of the authorizer, with
/// no size limit and no expiry.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Maximum number of entries; `None` is unbounded
    pub capacity: Option<usize>,

    /// Time-to-live for cached decisions; `None` never expires
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    /// Unbounded, never expiring
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Limit the number of entries
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    /// Expire entries after `ttl`
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Cache key type (BLAKE3 hash)
pub type CacheKey = [u8; 32];

#[derive(Clone, Copy)]
struct CachedEntry {
    allowed: bool,
    cached_at: Instant,
    // Insertion order, used for eviction
    seq: u64,
}

impl CachedEntry {
    fn new(allowed: bool, seq: u64) -> Self {
        Self {
            allowed,
            cached_at: Instant::now(),
            seq,
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.cached_at.elapsed() > ttl)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    inserts: AtomicU64,
}

/// In-memory decision cache owned by one authorizer
///
/// Absence (`None`) means "not resolved yet" and is distinct from a cached
/// `false`. Writes go through `DashMap` so concurrent first resolutions of
/// the same key cannot lose updates.
pub struct DecisionCache {
    entries: Arc<DashMap<CacheKey, CachedEntry>>,
    config: CacheConfig,
    counters: Counters,
}

impl DecisionCache {
    /// Create a new decision cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
            counters: Counters::default(),
        }
    }

    /// Cached decision for `key`, if any
    pub fn get(&self, key: &CacheKey) -> Option<bool> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.entries.remove(key);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.allowed);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cached decision for `key` without touching hit/miss counters
    pub fn peek(&self, key: &CacheKey) -> Option<bool> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(self.config.ttl))
            .map(|entry| entry.allowed)
    }

    /// Drop one cached decision
    pub fn remove(&self, key: &CacheKey) -> Option<bool> {
        self.entries.remove(key).map(|(_, entry)| entry.allowed)
    }

    /// Store a decision unconditionally
    pub fn set(&self, key: CacheKey, allowed: bool) {
        if let Some(capacity) = self.config.capacity {
            if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
                self.evict_oldest(capacity);
            }
        }

        let seq = self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, CachedEntry::new(allowed, seq));
    }

    /// Store a decision unless a live one already exists; returns the stored one
    ///
    /// First resolution wins. An expired entry counts as absent.
    pub fn insert_if_absent(&self, key: CacheKey, allowed: bool) -> bool {
        if let Some(capacity) = self.config.capacity {
            if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
                self.evict_oldest(capacity);
            }
        }

        let seq = self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        let mut entry = self
            .entries
            .entry(key)
            .or_insert(CachedEntry::new(allowed, seq));
        if entry.is_expired(self.config.ttl) {
            *entry = CachedEntry::new(allowed, seq);
        }
        entry.allowed
    }

    /// Drop every cached decision
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Derive the cache key for one check
    ///
    /// Each part is length-prefixed before hashing. Object values are
    /// projected onto `context.cache_keys` when present; a projected field
    /// missing from the value hashes as `null`. Object keys are hashed in
    /// sorted order at every depth.
    pub fn compute_key(subject: &str, action: &str, context: &Context) -> Result<CacheKey> {
        let projected = project(&context.value, context.cache_keys.as_ref());
        let encoded = serde_json::to_vec(&canonical(&projected))?;

        let mut hasher = Hasher::new();
        for part in [subject.as_bytes(), action.as_bytes(), encoded.as_slice()] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }

        Ok(*hasher.finalize().as_bytes())
    }

    /// Evict roughly the oldest tenth of the entries
    fn evict_oldest(&self, capacity: usize) {
        let to_remove = (capacity / 10).max(1);

        let mut ages: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().seq))
            .collect();
        ages.sort_unstable_by_key(|(_, seq)| *seq);

        for (key, _) in ages.into_iter().take(to_remove) {
            if self.entries.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn project(value: &Value, fields: Option<&std::collections::BTreeSet<String>>) -> Value {
    match (value, fields) {
        (Value::Object(object), Some(fields)) => Value::Object(
            fields
                .iter()
                .map(|field| (field.clone(), object.get(field).cloned().unwrap_or(Value::Null)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

// Rebuilds objects in key order so the encoding does not depend on how
// serde_json orders its maps.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(object.len());
            for key in keys {
                sorted.insert(key.clone(), canonical(&object[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub entries: usize,
    pub max_entries: Option<usize>,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
