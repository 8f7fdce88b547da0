//! Read path: cache first, fallback store second, never a provider for
//! snapshots.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{history_key, symbol_key, CacheConfig, CachedValue, MarketCache};
use crate::registry::ProviderRegistry;
use crate::store::SnapshotStore;
use crate::{
    join_symbols, Domain, HistoryRange, MarketRecord, ReadError, SeriesPoint, Symbol,
};

/// Where the records of a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Cache,
    Store,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRead {
    pub records: Vec<MarketRecord>,
    pub freshness: Freshness,
    /// Requested symbols found neither in the cache nor in the store.
    pub missing: Vec<String>,
}

pub struct MarketReader {
    cache: MarketCache,
    cache_config: CacheConfig,
    store: Option<Arc<dyn SnapshotStore>>,
    registries: Vec<Arc<ProviderRegistry>>,
}

impl MarketReader {
    pub fn new(cache: MarketCache, cache_config: CacheConfig) -> Self {
        Self {
            cache,
            cache_config,
            store: None,
            registries: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Registry used for history misses in its domain.
    pub fn with_registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registries
            .retain(|known| known.domain() != registry.domain());
        self.registries.push(registry);
        self
    }

    /// Latest records for `symbols`, in request order.
    pub async fn read_snapshot(
        &self,
        domain: Domain,
        symbols: &[Symbol],
    ) -> Result<SnapshotRead, ReadError> {
        let mut records = Vec::with_capacity(symbols.len());
        let mut cold = Vec::new();

        for symbol in symbols {
            match self.cache.get(&symbol_key(domain, symbol.as_str())).await {
                Some(CachedValue::Record(record)) => records.push(record),
                _ => cold.push(symbol.clone()),
            }
        }
        let from_cache = records.len();

        if !cold.is_empty() {
            if let Some(store) = &self.store {
                match store.latest_batch(&cold, domain).await {
                    Ok(stored) => records.extend(stored),
                    Err(error) => {
                        warn!(domain = %domain, error = %error, "fallback store read failed");
                    }
                }
            }
        }

        if records.is_empty() {
            return Err(ReadError::NoDataYet {
                domain,
                symbols: join_symbols(symbols),
            });
        }

        let freshness = match (from_cache, records.len() - from_cache) {
            (_, 0) => Freshness::Cache,
            (0, _) => Freshness::Store,
            _ => Freshness::Mixed,
        };

        records.sort_by_key(|record| {
            symbols
                .iter()
                .position(|symbol| symbol.as_str() == record.symbol)
                .unwrap_or(usize::MAX)
        });
        let missing = symbols
            .iter()
            .filter(|symbol| !records.iter().any(|record| record.symbol == symbol.as_str()))
            .map(|symbol| symbol.as_str().to_owned())
            .collect();

        debug!(
            domain = %domain,
            records = records.len(),
            freshness = ?freshness,
            "snapshot read"
        );
        Ok(SnapshotRead {
            records,
            freshness,
            missing,
        })
    }

    /// Cached history, fetched through the registry on a miss. Empty when no
    /// provider had data; empty results are not cached.
    pub async fn read_history(
        &self,
        domain: Domain,
        symbol: &Symbol,
        range: HistoryRange,
    ) -> Vec<SeriesPoint> {
        let key = history_key(domain, symbol, range);
        if let Some(CachedValue::History(points)) = self.cache.get(&key).await {
            return points;
        }

        let Some(registry) = self
            .registries
            .iter()
            .find(|registry| registry.domain() == domain)
        else {
            debug!(domain = %domain, "no registry for history read");
            return Vec::new();
        };

        let points = registry.fetch_history(symbol, range).await;
        if !points.is_empty() {
            self.cache
                .set(
                    key,
                    CachedValue::History(points.clone()),
                    self.cache_config.history_ttl,
                )
                .await;
        }
        points
    }
}
