//! Capacity-bounded in-memory cache with per-write TTL.
//!
//! Entries expire lazily on read. When a write would exceed capacity the
//! least recently touched entry (by `get` or `set`) is evicted. Every write
//! replaces the stored value and expiry under one lock, so readers never see
//! a half-written entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::{Domain, HistoryRange, MarketRecord, SeriesPoint, Symbol};

/// Cache sizing and per-namespace TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub crypto_snapshot_ttl: Duration,
    pub stock_snapshot_ttl: Duration,
    pub history_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            crypto_snapshot_ttl: Duration::from_secs(15),
            stock_snapshot_ttl: Duration::from_secs(30),
            history_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl CacheConfig {
    pub const fn snapshot_ttl(&self, domain: Domain) -> Duration {
        match domain {
            Domain::Crypto => self.crypto_snapshot_ttl,
            Domain::Stock => self.stock_snapshot_ttl,
        }
    }
}

/// Key for a whole snapshot batch. Symbol order does not matter.
pub fn snapshot_key(domain: Domain, symbols: &[Symbol]) -> String {
    let mut names = symbols.iter().map(Symbol::as_str).collect::<Vec<_>>();
    names.sort_unstable();
    names.dedup();
    format!("{domain}:snapshot:{}", names.join(","))
}

/// Key for the latest record of one symbol.
pub fn symbol_key(domain: Domain, symbol: &str) -> String {
    format!("{domain}:symbol:{symbol}")
}

pub fn history_key(domain: Domain, symbol: &Symbol, range: HistoryRange) -> String {
    format!("{domain}:history:{symbol}:{range}")
}

/// Values held by the shared market cache, one variant per key namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Snapshot(Vec<MarketRecord>),
    Record(MarketRecord),
    History(Vec<SeriesPoint>),
}

/// The cache shared by the worker (writer) and the read path.
pub type MarketCache = TtlCache<CachedValue>;

/// Counters exposed by [`TtlCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    touched: u64,
}

#[derive(Debug)]
struct CacheInner<V> {
    map: HashMap<String, CacheEntry<V>>,
    recency: BTreeMap<u64, String>,
    tick: u64,
    capacity: usize,
    stats: CacheStats,
}

impl<V: Clone> CacheInner<V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            capacity: capacity.max(1),
            stats: CacheStats::default(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.map.remove(key)?;
        self.recency.remove(&entry.touched);
        Some(entry)
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        let expired = match self.map.get(key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some(entry) => now >= entry.expires_at,
        };

        if expired {
            self.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            return None;
        }

        let tick = self.next_tick();
        let entry = self.map.get_mut(key)?;
        self.recency.remove(&entry.touched);
        entry.touched = tick;
        self.recency.insert(tick, key.to_owned());
        self.stats.hits += 1;
        Some(entry.value.clone())
    }

    fn set(&mut self, key: String, value: V, expires_at: Instant) {
        if self.remove(&key).is_none() {
            while self.map.len() >= self.capacity {
                let Some((_, victim)) = self.recency.pop_first() else {
                    break;
                };
                self.map.remove(&victim);
                self.stats.evictions += 1;
            }
        }

        let touched = self.next_tick();
        self.recency.insert(touched, key.clone());
        self.map.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                touched,
            },
        );
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired = self
            .map
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }
}

/// Thread-safe LRU cache with per-entry expiry.
pub struct TtlCache<V> {
    inner: Arc<Mutex<CacheInner<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V: Clone + Send> TtlCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::new(capacity))),
            clock,
        }
    }

    /// Returns the value if present and not yet expired, marking it as used.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.inner.lock().await.get(key, now)
    }

    /// Stores `value` for `ttl`, replacing any previous entry for `key`.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = self.clock.now() + ttl;
        self.inner.lock().await.set(key.into(), value, expires_at);
    }

    /// Presence check that neither counts as a use nor updates stats.
    pub async fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let store = self.inner.lock().await;
        store
            .map
            .get(key)
            .is_some_and(|entry| now < entry.expires_at)
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.lock().await.remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet read.
    pub async fn size(&self) -> usize {
        self.inner.lock().await.map.len()
    }

    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.inner.lock().await.purge_expired(now)
    }

    pub async fn clear(&self) {
        let mut store = self.inner.lock().await;
        store.map.clear();
        store.recency.clear();
    }

    pub async fn stats(&self) -> CacheStats {
        let store = self.inner.lock().await;
        CacheStats {
            size: store.map.len(),
            capacity: store.capacity,
            ..store.stats
        }
    }
}
