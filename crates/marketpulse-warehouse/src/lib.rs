//! # marketpulse warehouse
//!
//! DuckDB-backed storage for the latest market snapshot of every tracked
//! symbol. The refresh worker upserts each fresh record here; read paths fall
//! back to it when the in-memory cache is cold.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `snapshots_latest` | Latest record per (domain, symbol) |
//! | `schema_migrations` | Applied migration versions |
//!
//! All values are bound as query parameters, never interpolated.

pub mod duckdb;
pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params_from_iter, Connection, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use crate::duckdb::{DuckDbPool, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot row: {0}")]
    InvalidRow(String),
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for marketpulse data.
    pub home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Idle connections kept for reuse.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let home = resolve_home();
        let db_path = home.join("warehouse.duckdb");
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    /// Config for an explicit database file; its directory becomes the home.
    pub fn at(db_path: impl Into<PathBuf>) -> Self {
        let db_path = db_path.into();
        let home = db_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// One row of `snapshots_latest`.
///
/// The warehouse stays independent of the core's domain types: `domain` is
/// the lowercase domain name and `as_of_ms` the record timestamp in Unix
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRow {
    pub domain: String,
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub as_of_ms: i64,
    pub source: String,
}

impl SnapshotRow {
    fn validate(&self) -> Result<(), WarehouseError> {
        if self.domain.trim().is_empty() || self.symbol.trim().is_empty() {
            return Err(WarehouseError::InvalidRow(format!(
                "domain and symbol are required (domain='{}', symbol='{}')",
                self.domain, self.symbol
            )));
        }
        if !self.price.is_finite() {
            return Err(WarehouseError::InvalidRow(format!(
                "price for {} is not finite",
                self.symbol
            )));
        }
        Ok(())
    }
}

/// The warehouse handle. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: DuckDbPool,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Opens (creating if needed) the database and applies migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let pool = DuckDbPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Inserts or replaces rows keyed by (domain, symbol) in one transaction.
    pub fn upsert_snapshots(&self, rows: &[SnapshotRow]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        for row in rows {
            row.validate()?;
        }

        let connection = self.pool.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 9] = [
                    &row.domain,
                    &row.symbol,
                    &row.name,
                    &row.price,
                    &row.change_24h,
                    &row.volume,
                    &row.market_cap,
                    &row.as_of_ms,
                    &row.source,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO snapshots_latest \
                     (domain, symbol, name, price, change_24h, volume, market_cap, as_of_ms, source, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    pub fn upsert_snapshot(&self, row: &SnapshotRow) -> Result<(), WarehouseError> {
        self.upsert_snapshots(std::slice::from_ref(row)).map(|_| ())
    }

    /// Latest stored rows for `symbols` in `domain`, ordered by symbol.
    /// Symbols never stored are simply absent.
    pub fn latest_snapshots(
        &self,
        domain: &str,
        symbols: &[String],
    ) -> Result<Vec<SnapshotRow>, WarehouseError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; symbols.len()].join(", ");
        let sql = format!(
            "SELECT domain, symbol, name, price, change_24h, volume, market_cap, as_of_ms, source \
             FROM snapshots_latest WHERE domain = ? AND symbol IN ({placeholders}) \
             ORDER BY symbol"
        );

        let connection = self.pool.acquire()?;
        let mut params: Vec<&str> = Vec::with_capacity(symbols.len() + 1);
        params.push(domain);
        params.extend(symbols.iter().map(String::as_str));

        query_rows(&connection, sql.as_str(), params)
    }

    /// Number of stored rows for `domain`.
    pub fn count_snapshots(&self, domain: &str) -> Result<usize, WarehouseError> {
        let connection = self.pool.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM snapshots_latest WHERE domain = ?",
            [domain],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn query_rows(
    connection: &Connection,
    sql: &str,
    params: Vec<&str>,
) -> Result<Vec<SnapshotRow>, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map(params_from_iter(params), |row| {
        Ok(SnapshotRow {
            domain: row.get(0)?,
            symbol: row.get(1)?,
            name: row.get(2)?,
            price: row.get(3)?,
            change_24h: row.get(4)?,
            volume: row.get(5)?,
            market_cap: row.get(6)?,
            as_of_ms: row.get(7)?,
            source: row.get(8)?,
        })
    })?;

    let mut collected = Vec::new();
    for row in rows {
        collected.push(row?);
    }
    Ok(collected)
}

/// Commits on success, rolls back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn resolve_home() -> PathBuf {
    if let Some(path) = env::var_os("MARKETPULSE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".marketpulse");
    }

    PathBuf::from(".marketpulse")
}
