//! Fallback snapshot store.
//!
//! The worker persists every fresh record here on a best-effort basis and the
//! read path consults it when the cache is cold.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use marketpulse_warehouse::{SnapshotRow, Warehouse};
use tokio::sync::RwLock;

use crate::{Domain, MarketRecord, StoreError, Symbol, UtcDateTime};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

pub trait SnapshotStore: Send + Sync {
    /// Idempotent upsert keyed by (kind, symbol).
    fn persist_record<'a>(&'a self, record: &'a MarketRecord) -> StoreFuture<'a, ()>;

    /// Latest stored record for each of `symbols` that has one.
    fn latest_batch<'a>(
        &'a self,
        symbols: &'a [Symbol],
        domain: Domain,
    ) -> StoreFuture<'a, Vec<MarketRecord>>;
}

/// Process-local store, for tests and runs without a warehouse.
#[derive(Debug, Default, Clone)]
pub struct MemorySnapshotStore {
    records: Arc<RwLock<HashMap<(Domain, String), MarketRecord>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn persist_record<'a>(&'a self, record: &'a MarketRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.records
                .write()
                .await
                .insert((record.kind, record.symbol.clone()), record.clone());
            Ok(())
        })
    }

    fn latest_batch<'a>(
        &'a self,
        symbols: &'a [Symbol],
        domain: Domain,
    ) -> StoreFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            let records = self.records.read().await;
            Ok(symbols
                .iter()
                .filter_map(|symbol| records.get(&(domain, symbol.as_str().to_owned())))
                .cloned()
                .collect())
        })
    }
}

/// [`SnapshotStore`] over the DuckDB warehouse. Blocking database work runs on
/// the blocking thread pool.
#[derive(Debug, Clone)]
pub struct WarehouseSnapshotStore {
    warehouse: Warehouse,
}

impl WarehouseSnapshotStore {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }
}

fn to_row(record: &MarketRecord) -> SnapshotRow {
    SnapshotRow {
        domain: record.kind.as_str().to_owned(),
        symbol: record.symbol.clone(),
        name: record.name.clone(),
        price: record.price,
        change_24h: record.change_24h,
        volume: record.volume,
        market_cap: record.market_cap,
        as_of_ms: record.timestamp.unix_millis(),
        source: record.source.clone(),
    }
}

fn from_row(row: SnapshotRow, domain: Domain) -> Result<MarketRecord, StoreError> {
    let timestamp = UtcDateTime::from_unix_millis(row.as_of_ms).ok_or_else(|| {
        StoreError::InvalidRow(format!(
            "timestamp {} for {} is out of range",
            row.as_of_ms, row.symbol
        ))
    })?;

    Ok(MarketRecord {
        symbol: row.symbol,
        name: row.name,
        price: row.price,
        change_24h: row.change_24h,
        volume: row.volume,
        market_cap: row.market_cap,
        timestamp,
        source: row.source,
        kind: domain,
    })
}

impl SnapshotStore for WarehouseSnapshotStore {
    fn persist_record<'a>(&'a self, record: &'a MarketRecord) -> StoreFuture<'a, ()> {
        let warehouse = self.warehouse.clone();
        let row = to_row(record);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || warehouse.upsert_snapshot(&row))
                .await
                .map_err(|error| StoreError::Join(error.to_string()))??;
            Ok(())
        })
    }

    fn latest_batch<'a>(
        &'a self,
        symbols: &'a [Symbol],
        domain: Domain,
    ) -> StoreFuture<'a, Vec<MarketRecord>> {
        let warehouse = self.warehouse.clone();
        let wanted = symbols
            .iter()
            .map(|symbol| symbol.as_str().to_owned())
            .collect::<Vec<_>>();
        Box::pin(async move {
            let rows = tokio::task::spawn_blocking(move || {
                warehouse.latest_snapshots(domain.as_str(), &wanted)
            })
            .await
            .map_err(|error| StoreError::Join(error.to_string()))??;

            rows.into_iter().map(|row| from_row(row, domain)).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketpulse_warehouse::WarehouseConfig;
    use tempfile::tempdir;

    fn record(symbol: &str, price: f64, kind: Domain) -> MarketRecord {
        MarketRecord {
            symbol: symbol.to_owned(),
            name: symbol.to_owned(),
            price,
            change_24h: Some(-0.4),
            volume: Some(10.0),
            market_cap: None,
            timestamp: UtcDateTime::from_unix_millis(1_700_000_000_000).expect("valid millis"),
            source: String::from("coincap"),
            kind,
        }
    }

    #[tokio::test]
    async fn memory_store_upserts_per_domain_and_symbol() {
        let store = MemorySnapshotStore::new();
        store
            .persist_record(&record("BTC", 1.0, Domain::Crypto))
            .await
            .expect("persist");
        store
            .persist_record(&record("BTC", 2.0, Domain::Crypto))
            .await
            .expect("persist");
        store
            .persist_record(&record("AAPL", 3.0, Domain::Stock))
            .await
            .expect("persist");

        assert_eq!(store.len().await, 2);
        let latest = store
            .latest_batch(&Symbol::parse_many(["BTC", "ETH"]).expect("valid"), Domain::Crypto)
            .await
            .expect("read");
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].price, 2.0);
    }

    #[tokio::test]
    async fn warehouse_store_round_trips_records() {
        let temp = tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::at(temp.path().join("w.duckdb")))
            .expect("warehouse open");
        let store = WarehouseSnapshotStore::new(warehouse);

        let stored = record("ETH", 3_200.0, Domain::Crypto);
        store.persist_record(&stored).await.expect("persist");

        let latest = store
            .latest_batch(&Symbol::parse_many(["ETH"]).expect("valid"), Domain::Crypto)
            .await
            .expect("read");
        assert_eq!(latest, vec![stored]);

        let other_domain = store
            .latest_batch(&Symbol::parse_many(["ETH"]).expect("valid"), Domain::Stock)
            .await
            .expect("read");
        assert!(other_domain.is_empty());
    }
}
