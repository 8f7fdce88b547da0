//! Environment-driven configuration.
//!
//! Every section has a `Default`; [`CoreConfig::from_env`] overrides fields
//! from `MARKETPULSE_*` variables. API keys also accept the vendor's
//! conventional variable name (`FINNHUB_API_KEY`, ...).

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::optimizer::OptimizerConfig;
use crate::{Domain, ProviderId, Symbol, ValidationError};

const DEFAULT_CRYPTO_SYMBOLS: [&str; 7] = ["BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE"];
const DEFAULT_STOCK_SYMBOLS: [&str; 7] = ["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "TSLA", "META"];

/// Background refresh cadence, retry budget and tracked symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerConfig {
    pub crypto_interval: Duration,
    pub stock_interval: Duration,
    /// Total attempts per tick, including the first.
    pub retry_attempts: u32,
    /// Base delay; attempt `n` waits `retry_backoff * 2^(n-1)`.
    pub retry_backoff: Duration,
    /// Spread each retry delay over +/- 50% of its nominal value.
    pub retry_jitter: bool,
    pub sweep_interval: Duration,
    pub crypto_symbols: Vec<Symbol>,
    pub stock_symbols: Vec<Symbol>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            crypto_interval: Duration::from_secs(5),
            stock_interval: Duration::from_secs(10),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1_000),
            retry_jitter: false,
            sweep_interval: Duration::from_secs(5 * 60),
            crypto_symbols: default_symbols(&DEFAULT_CRYPTO_SYMBOLS),
            stock_symbols: default_symbols(&DEFAULT_STOCK_SYMBOLS),
        }
    }
}

impl WorkerConfig {
    pub const fn interval(&self, domain: Domain) -> Duration {
        match domain {
            Domain::Crypto => self.crypto_interval,
            Domain::Stock => self.stock_interval,
        }
    }

    pub fn symbols(&self, domain: Domain) -> &[Symbol] {
        match domain {
            Domain::Crypto => &self.crypto_symbols,
            Domain::Stock => &self.stock_symbols,
        }
    }
}

fn default_symbols(raw: &[&str]) -> Vec<Symbol> {
    raw.iter()
        .filter_map(|symbol| Symbol::parse(symbol).ok())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryConfig {
    /// Upper bound on a single provider call; expiry counts as a failure.
    pub provider_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
        }
    }
}

/// Key-presence check consumed by the registry's eligibility filter.
pub trait KeyProvider: Send + Sync {
    fn api_key(&self, provider: ProviderId) -> Option<&str>;

    fn has_key(&self, provider: ProviderId) -> bool {
        self.api_key(provider).is_some()
    }
}

/// Per-provider API keys. Blank values count as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ApiKeys {
    keys: BTreeMap<ProviderId, String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.keys.keys()).finish()
    }
}

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: ProviderId, key: impl Into<String>) -> Self {
        self.insert(provider, key);
        self
    }

    pub fn insert(&mut self, provider: ProviderId, key: impl Into<String>) {
        let key = key.into();
        let key = key.trim();
        if key.is_empty() {
            self.keys.remove(&provider);
        } else {
            self.keys.insert(provider, key.to_owned());
        }
    }

    pub fn configured(&self) -> impl Iterator<Item = ProviderId> + '_ {
        self.keys.keys().copied()
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let mut keys = Self::new();
        for provider in ProviderId::BUILT_IN {
            let token = provider.env_token();
            let value = lookup(&format!("MARKETPULSE_{token}_API_KEY"))
                .or_else(|| lookup(&format!("{token}_API_KEY")));
            if let Some(value) = value {
                keys.insert(provider, value);
            }
        }
        keys
    }
}

impl KeyProvider for ApiKeys {
    fn api_key(&self, provider: ProviderId) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }
}

/// Complete runtime configuration for the aggregation core.
#[derive(Debug, Clone, Default)]
pub struct CoreConfig {
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub breaker: CircuitBreakerConfig,
    pub optimizer: OptimizerConfig,
    pub registry: RegistryConfig,
    pub api_keys: ApiKeys,
    pub warehouse_path: Option<PathBuf>,
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ValidationError> {
        let mut config = Self::default();

        if let Some(value) = millis(&lookup, "MARKETPULSE_CRYPTO_INTERVAL_MS")? {
            config.worker.crypto_interval = value;
        }
        if let Some(value) = millis(&lookup, "MARKETPULSE_STOCK_INTERVAL_MS")? {
            config.worker.stock_interval = value;
        }
        if let Some(value) = parsed::<u32>(&lookup, "MARKETPULSE_RETRY_ATTEMPTS")? {
            config.worker.retry_attempts = value.max(1);
        }
        if let Some(value) = millis(&lookup, "MARKETPULSE_RETRY_BACKOFF_MS")? {
            config.worker.retry_backoff = value;
        }
        if let Some(value) = parsed::<bool>(&lookup, "MARKETPULSE_RETRY_JITTER")? {
            config.worker.retry_jitter = value;
        }
        if let Some(value) = symbols(&lookup, "MARKETPULSE_CRYPTO_SYMBOLS")? {
            config.worker.crypto_symbols = value;
        }
        if let Some(value) = symbols(&lookup, "MARKETPULSE_STOCK_SYMBOLS")? {
            config.worker.stock_symbols = value;
        }

        if let Some(value) = parsed::<usize>(&lookup, "MARKETPULSE_CACHE_CAPACITY")? {
            config.cache.capacity = value.max(1);
        }
        if let Some(value) = millis(&lookup, "MARKETPULSE_CRYPTO_TTL_MS")? {
            config.cache.crypto_snapshot_ttl = value;
        }
        if let Some(value) = millis(&lookup, "MARKETPULSE_STOCK_TTL_MS")? {
            config.cache.stock_snapshot_ttl = value;
        }
        if let Some(value) = millis(&lookup, "MARKETPULSE_HISTORY_TTL_MS")? {
            config.cache.history_ttl = value;
        }

        if let Some(value) = parsed::<u32>(&lookup, "MARKETPULSE_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = value.max(1);
        }
        if let Some(value) = millis(&lookup, "MARKETPULSE_BREAKER_RECOVERY_MS")? {
            config.breaker.recovery_timeout = value;
        }
        if let Some(value) = parsed::<u32>(&lookup, "MARKETPULSE_BREAKER_SUCCESS_THRESHOLD")? {
            config.breaker.success_threshold = value.max(1);
        }

        if let Some(value) = millis(&lookup, "MARKETPULSE_PROVIDER_TIMEOUT_MS")? {
            config.registry.provider_timeout = value;
        }

        config.api_keys = ApiKeys::from_lookup(&lookup);
        config.warehouse_path = lookup("MARKETPULSE_WAREHOUSE_PATH")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ValidationError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let parsed = raw.trim().parse::<T>();
    parsed
        .map(Some)
        .map_err(|_| ValidationError::InvalidConfig {
            key: key.to_owned(),
            value: raw,
        })
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ValidationError> {
    Ok(parsed::<u64>(lookup, key)?.map(Duration::from_millis))
}

fn symbols(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Vec<Symbol>>, ValidationError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let parsed = Symbol::parse_many(raw.split(',').filter(|part| !part.trim().is_empty()))
        .map_err(|_| ValidationError::InvalidConfig {
            key: key.to_owned(),
            value: raw.clone(),
        })?;
    Ok(Some(parsed))
}
