//! Compute Cache
//!
//! A bounded, least-recently-used map from content hash to computed value,
//! shared by every node and context that uses it. Because keys are content
//! hashes, two unrelated nodes doing the same work with the same inputs hit
//! the same entry.
//!
//! # How It Works
//!
//! 1. A lookup touches the entry's access stamp (an atomic taken from a
//!    global clock) under a shard read lock, so concurrent hits never block
//!    each other.
//!
//! 2. On a miss, the first requester for a key becomes its leader and runs
//!    the computation. Later requesters for the same key find the in-flight
//!    record and wait on it instead of computing again.
//!
//! 3. The leader stores a successful result, wakes the waiters and retires
//!    the in-flight record. Failures are handed to the waiters but never
//!    cached, so the next request retries.
//!
//! 4. When an insert pushes the cache over capacity, the entries with the
//!    oldest access stamps are evicted down to a low-water mark slightly
//!    below capacity, so steady-state inserts do not each pay for a scan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::{GraphError, Result};
use crate::hash::Hash;
use crate::value::Value;

/// A cached value and when it was last used.
#[derive(Debug)]
struct Entry {
    value: Value,
    last_used: AtomicU64,
}

/// A computation some thread is currently running.
#[derive(Debug, Default)]
struct InFlight {
    result: Mutex<Option<Result<Value>>>,
    ready: Condvar,
}

impl InFlight {
    fn wait(&self) -> Result<Value> {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    fn complete(&self, result: Result<Value>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }
}

/// Counters describing cache behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing. Through `get_or_compute` every miss
    /// either computes or waits.
    pub misses: u64,
    /// Computations actually run.
    pub computes: u64,
    /// Requests that waited on another thread's computation.
    pub waits: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    waits: AtomicU64,
    evictions: AtomicU64,
}

/// The shared hash-keyed value cache.
#[derive(Debug)]
pub struct ComputeCache {
    entries: DashMap<Hash, Entry>,
    in_flight: Mutex<HashMap<Hash, Arc<InFlight>>>,
    capacity: AtomicUsize,
    clock: AtomicU64,
    eviction: Mutex<()>,
    counters: Counters,
}

static GLOBAL: OnceLock<Arc<ComputeCache>> = OnceLock::new();

impl ComputeCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: Mutex::new(HashMap::new()),
            capacity: AtomicUsize::new(config.capacity.max(1)),
            clock: AtomicU64::new(0),
            eviction: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    /// The process-wide cache, created with default settings on first use.
    pub fn global() -> Arc<ComputeCache> {
        GLOBAL
            .get_or_init(|| Arc::new(ComputeCache::new(CacheConfig::default())))
            .clone()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(&self, key: &Hash) -> Option<Value> {
        self.entries.get(key).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            entry.value.clone()
        })
    }

    /// Look up a value, refreshing its recency.
    pub fn get(&self, key: &Hash) -> Option<Value> {
        let found = self.lookup(key);
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub fn contains(&self, key: &Hash) -> bool {
        self.entries.contains_key(key)
    }

    /// Store a value, evicting old entries if over capacity.
    pub fn insert(&self, key: Hash, value: Value) {
        let entry = Entry {
            value,
            last_used: AtomicU64::new(self.tick()),
        };
        self.entries.insert(key, entry);
        if self.entries.len() > self.capacity() {
            self.evict();
        }
    }

    /// Return the value cached for `key`, running `compute` at most once
    /// across all threads if it is missing.
    pub fn get_or_compute<F>(&self, key: Hash, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        if let Some(value) = self.lookup(&key) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            trace!(?key, "cache hit");
            return Ok(value);
        }

        let (flight, leader) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    // The previous leader may have finished between our miss and taking the lock.
                    if let Some(value) = self.lookup(&key) {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                    let flight = Arc::new(InFlight::default());
                    in_flight.insert(key, flight.clone());
                    (flight, true)
                }
            }
        };
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        if !leader {
            self.counters.waits.fetch_add(1, Ordering::Relaxed);
            trace!(?key, "waiting on in-flight computation");
            return flight.wait();
        }

        let mut guard = LeaderGuard {
            cache: self,
            key,
            flight,
            completed: false,
        };
        self.counters.computes.fetch_add(1, Ordering::Relaxed);
        trace!(?key, "cache miss, computing");
        let result = compute();
        if let Ok(value) = &result {
            self.insert(key, value.clone());
        }
        guard.flight.complete(result.clone());
        guard.completed = true;
        result
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached value. In-flight computations are unaffected.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change the bound, evicting immediately if it shrank.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::Relaxed);
        if self.entries.len() > self.capacity() {
            self.evict();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computes: self.counters.computes.load(Ordering::Relaxed),
            waits: self.counters.waits.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evict least-recently-used entries down to the low-water mark.
    fn evict(&self) {
        let _eviction = self.eviction.lock();
        let capacity = self.capacity();
        let len = self.entries.len();
        if len <= capacity {
            return;
        }
        let low_water = capacity - capacity / 16;
        let excess = len - low_water;

        let mut stamps: Vec<(u64, Hash)> = self
            .entries
            .iter()
            .map(|entry| (entry.last_used.load(Ordering::Relaxed), *entry.key()))
            .collect();
        stamps.sort_unstable_by_key(|(stamp, _)| *stamp);

        let mut evicted = 0u64;
        for (_, key) in stamps.into_iter().take(excess) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(evicted, capacity, "evicted least recently used cache entries");
    }
}

impl Default for ComputeCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Retires the in-flight record when the leader finishes, and fails the
/// waiters if the leader unwound without completing.
struct LeaderGuard<'a> {
    cache: &'a ComputeCache,
    key: Hash,
    flight: Arc<InFlight>,
    completed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.flight.complete(Err(GraphError::Panicked(
                "computation unwound before completing".to_string(),
            )));
        }
        self.cache.in_flight.lock().remove(&self.key);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
