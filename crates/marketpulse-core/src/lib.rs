//! Market data aggregation core for marketpulse.
//!
//! This crate contains:
//! - Canonical domain models and validation
//! - Provider contract, built-in adapters and response normalization
//! - Priority registry with failover, circuit breakers and adaptive ordering
//! - TTL cache, fallback snapshot store and the read path over both
//! - Background refresh worker with retry and change notification

pub mod adapters;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod http_client;
pub mod normalizer;
pub mod optimizer;
pub mod provider;
pub mod reader;
pub mod registry;
pub mod retry;
pub mod source;
pub mod store;
pub mod worker;

pub use adapters::built_in_providers;
pub use cache::{CacheConfig, CacheStats, CachedValue, MarketCache, TtlCache};
pub use circuit_breaker::{
    BreakerSnapshot, BreakerStore, CircuitBreaker, CircuitBreakerConfig, CircuitState,
};
pub use clock::{Clock, ManualClock, RecordingSleeper, Sleeper, SystemClock, TokioSleeper};
pub use config::{ApiKeys, CoreConfig, KeyProvider, RegistryConfig, WorkerConfig};
pub use domain::{join_symbols, Domain, HistoryRange, MarketRecord, SeriesPoint, Symbol, UtcDateTime};
pub use error::{CoreError, ReadError, RegistryError, StoreError, ValidationError};
pub use http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use marketpulse_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
pub use optimizer::{MetricsSnapshot, OptimizerConfig, PerformanceOptimizer, SweepReport};
pub use provider::{
    Capability, CapabilitySet, LiveFeed, MarketDataProvider, ProviderDescriptor, ProviderFuture,
    SourceError, SourceErrorKind,
};
pub use reader::{Freshness, MarketReader, SnapshotRead};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder, ProviderStatus};
pub use retry::{Backoff, RetryPolicy};
pub use source::ProviderId;
pub use store::{MemorySnapshotStore, SnapshotStore, WarehouseSnapshotStore};
pub use worker::{RefreshWorker, RefreshWorkerBuilder, Subscription, WorkerStatus};
