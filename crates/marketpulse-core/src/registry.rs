//! Per-domain provider registry.
//!
//! The registry owns the providers of one domain together with their circuit
//! breakers and performance metrics, and applies both uniformly around each
//! raw provider call. A request walks the eligible providers sequentially in
//! the order planned at its start; the first non-empty answer wins.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BreakerSnapshot, BreakerStore, CircuitBreakerConfig};
use crate::clock::{Clock, SystemClock};
use crate::config::{ApiKeys, CoreConfig, KeyProvider, RegistryConfig};
use crate::http_client::HttpClient;
use crate::optimizer::{MetricsSnapshot, OptimizerConfig, PerformanceOptimizer, SweepReport};
use crate::provider::{
    Capability, LiveFeed, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{
    adapters, Domain, HistoryRange, MarketRecord, ProviderId, RegistryError, SeriesPoint, Symbol,
};

/// Provider state reported by the `sources` command.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub id: ProviderId,
    pub static_priority: u32,
    pub dynamic_priority: f64,
    pub capabilities: Vec<&'static str>,
    pub requires_key: bool,
    pub key_present: bool,
    pub rate_limit_per_window: Option<u32>,
    pub breaker: Option<BreakerSnapshot>,
    pub metrics: Option<MetricsSnapshot>,
}

/// Attempt bookkeeping for one registry walk.
#[derive(Debug, Default, Clone, Copy)]
struct WalkTally {
    attempted: usize,
    skipped: usize,
    vetoed: usize,
}

pub struct ProviderRegistry {
    domain: Domain,
    providers: Vec<Arc<dyn MarketDataProvider>>,
    keys: Arc<dyn KeyProvider>,
    breakers: BreakerStore,
    optimizer: Arc<PerformanceOptimizer>,
    config: RegistryConfig,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("domain", &self.domain)
            .field(
                "providers",
                &self.providers.iter().map(|p| p.id()).collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`ProviderRegistry`].
///
/// Defaults: no providers, no API keys, default breaker and optimizer
/// settings, and the system clock.
pub struct ProviderRegistryBuilder {
    domain: Domain,
    providers: Vec<Arc<dyn MarketDataProvider>>,
    keys: Arc<dyn KeyProvider>,
    breaker_config: CircuitBreakerConfig,
    optimizer_config: OptimizerConfig,
    optimizer: Option<Arc<PerformanceOptimizer>>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl ProviderRegistryBuilder {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            providers: Vec::new(),
            keys: Arc::new(ApiKeys::new()),
            breaker_config: CircuitBreakerConfig::default(),
            optimizer_config: OptimizerConfig::default(),
            optimizer: None,
            config: RegistryConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn MarketDataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(
        mut self,
        providers: impl IntoIterator<Item = Arc<dyn MarketDataProvider>>,
    ) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn keys(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = keys;
        self
    }

    pub fn breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn optimizer_config(mut self, config: OptimizerConfig) -> Self {
        self.optimizer_config = config;
        self
    }

    /// Shares an existing optimizer instead of creating one.
    pub fn optimizer(mut self, optimizer: Arc<PerformanceOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> ProviderRegistry {
        let domain = self.domain;
        let mut providers = Vec::with_capacity(self.providers.len());

        for provider in self.providers {
            let descriptor = *provider.descriptor();
            if descriptor.domain != domain {
                warn!(
                    provider = %descriptor.id,
                    domain = %domain,
                    provider_domain = %descriptor.domain,
                    "ignoring provider registered for another domain"
                );
                continue;
            }
            if providers
                .iter()
                .any(|known: &Arc<dyn MarketDataProvider>| known.id() == descriptor.id)
            {
                warn!(provider = %descriptor.id, domain = %domain, "ignoring duplicate provider");
                continue;
            }
            if descriptor.requires_key && !self.keys.has_key(descriptor.id) {
                info!(
                    provider = %descriptor.id,
                    domain = %domain,
                    "api key not configured; provider disabled"
                );
            }
            providers.push(provider);
        }

        let optimizer = self.optimizer.unwrap_or_else(|| {
            Arc::new(PerformanceOptimizer::new(
                self.optimizer_config,
                Arc::clone(&self.clock),
            ))
        });

        ProviderRegistry {
            domain,
            providers,
            keys: self.keys,
            breakers: BreakerStore::new(domain, self.breaker_config, self.clock),
            optimizer,
            config: self.config,
        }
    }
}

impl ProviderRegistry {
    pub fn builder(domain: Domain) -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new(domain)
    }

    /// Registry over every built-in provider of `domain`, configured from `config`.
    pub fn with_built_ins(
        domain: Domain,
        config: &CoreConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self::builder(domain)
            .providers(adapters::built_in_providers(
                domain,
                http_client,
                &config.api_keys,
            ))
            .keys(Arc::new(config.api_keys.clone()))
            .breaker_config(config.breaker)
            .optimizer_config(config.optimizer)
            .config(config.registry)
            .build()
    }

    pub const fn domain(&self) -> Domain {
        self.domain
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .iter()
            .map(|provider| *provider.descriptor())
            .collect()
    }

    pub fn breakers(&self) -> &BreakerStore {
        &self.breakers
    }

    pub fn optimizer(&self) -> &Arc<PerformanceOptimizer> {
        &self.optimizer
    }

    pub fn sweep(&self) -> SweepReport {
        self.optimizer.sweep()
    }

    pub fn reset_breaker(&self, provider: ProviderId) {
        self.breakers.reset(provider);
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|provider| {
                let descriptor = provider.descriptor();
                ProviderStatus {
                    id: descriptor.id,
                    static_priority: descriptor.static_priority,
                    dynamic_priority: self.optimizer.dynamic_priority(descriptor),
                    capabilities: descriptor.capabilities.supported(),
                    requires_key: descriptor.requires_key,
                    key_present: self.keys.has_key(descriptor.id),
                    rate_limit_per_window: descriptor.rate_limit_per_window,
                    breaker: self.breakers.snapshot(descriptor.id),
                    metrics: self.optimizer.snapshot(descriptor.id),
                }
            })
            .collect()
    }

    fn is_eligible(&self, descriptor: &ProviderDescriptor, capability: Capability) -> bool {
        descriptor.capabilities.supports(capability)
            && (!descriptor.requires_key || self.keys.has_key(descriptor.id))
    }

    /// Eligible providers for `capability`, in dynamic priority order.
    fn plan(&self, capability: Capability) -> Vec<Arc<dyn MarketDataProvider>> {
        let eligible = self
            .providers
            .iter()
            .map(|provider| *provider.descriptor())
            .filter(|descriptor| self.is_eligible(descriptor, capability))
            .collect::<Vec<_>>();

        self.optimizer
            .order_by_dynamic_priority(&eligible)
            .into_iter()
            .filter_map(|descriptor| {
                self.providers
                    .iter()
                    .find(|provider| provider.id() == descriptor.id)
                    .cloned()
            })
            .collect()
    }

    /// Fetches a snapshot from the first provider that returns data.
    pub async fn fetch_snapshot(
        &self,
        symbols: &[Symbol],
    ) -> Result<Vec<MarketRecord>, RegistryError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let plan = self.plan(Capability::Snapshot);
        if plan.is_empty() {
            return Err(RegistryError::NoEligibleProviders {
                domain: self.domain,
            });
        }

        let outcome = self
            .walk_with_fallback(Capability::Snapshot, &plan, move |provider| {
                Box::pin(async move { provider.fetch_snapshot(symbols).await })
            })
            .await;

        match outcome {
            Ok(records) => Ok(records),
            Err(tally) => {
                warn!(
                    domain = %self.domain,
                    attempted = tally.attempted,
                    skipped = tally.skipped,
                    "all snapshot providers exhausted"
                );
                Err(RegistryError::AllProvidersExhausted {
                    domain: self.domain,
                    attempted: tally.attempted,
                    skipped: tally.skipped,
                })
            }
        }
    }

    /// Fetches a price series; empty when no provider had data.
    pub async fn fetch_history(&self, symbol: &Symbol, range: HistoryRange) -> Vec<SeriesPoint> {
        let plan = self.plan(Capability::History);
        if plan.is_empty() {
            debug!(domain = %self.domain, "no history-capable providers configured");
            return Vec::new();
        }

        let outcome = self
            .walk_with_fallback(Capability::History, &plan, move |provider| {
                Box::pin(async move { provider.fetch_history(symbol, range).await })
            })
            .await;

        match outcome {
            Ok(points) => points,
            Err(tally) => {
                warn!(
                    domain = %self.domain,
                    symbol = %symbol,
                    range = %range,
                    attempted = tally.attempted,
                    skipped = tally.skipped,
                    "no history provider returned data"
                );
                Vec::new()
            }
        }
    }

    /// Opens a push feed on the first live-capable provider that accepts.
    pub async fn connect_live(&self, symbols: &[Symbol]) -> Result<LiveFeed, RegistryError> {
        let plan = self.plan(Capability::Live);
        if plan.is_empty() {
            return Err(RegistryError::NoEligibleProviders {
                domain: self.domain,
            });
        }

        let mut tally = WalkTally::default();
        for provider in &plan {
            let id = provider.id();
            let breaker = self.breakers.get(id);
            if breaker.is_blocking() {
                tally.skipped += 1;
                continue;
            }

            tally.attempted += 1;
            match breaker.call(provider.connect(symbols)).await {
                Ok(feed) => {
                    info!(provider = %id, domain = %self.domain, "live feed connected");
                    return Ok(feed);
                }
                Err(error) => {
                    warn!(provider = %id, domain = %self.domain, error = %error, "live connect failed");
                }
            }
        }

        Err(RegistryError::AllProvidersExhausted {
            domain: self.domain,
            attempted: tally.attempted,
            skipped: tally.skipped,
        })
    }

    /// Runs the walk, repeating it without the optimizer veto when the first
    /// pass attempted nothing.
    async fn walk_with_fallback<'a, T, F>(
        &self,
        capability: Capability,
        plan: &[Arc<dyn MarketDataProvider>],
        fetch: F,
    ) -> Result<Vec<T>, WalkTally>
    where
        F: Fn(Arc<dyn MarketDataProvider>) -> ProviderFuture<'a, Vec<T>>,
    {
        let mut tally = WalkTally::default();
        if let Some(items) = self.walk(capability, plan, true, &fetch, &mut tally).await {
            return Ok(items);
        }
        if tally.attempted > 0 || tally.vetoed == 0 {
            tally.skipped += tally.vetoed;
            return Err(tally);
        }

        info!(
            domain = %self.domain,
            capability = %capability,
            vetoed = tally.vetoed,
            "every provider was vetoed; retrying without optimizer veto"
        );
        let mut retry = WalkTally::default();
        match self.walk(capability, plan, false, &fetch, &mut retry).await {
            Some(items) => Ok(items),
            None => Err(retry),
        }
    }

    async fn walk<'a, T, F>(
        &self,
        capability: Capability,
        plan: &[Arc<dyn MarketDataProvider>],
        apply_veto: bool,
        fetch: &F,
        tally: &mut WalkTally,
    ) -> Option<Vec<T>>
    where
        F: Fn(Arc<dyn MarketDataProvider>) -> ProviderFuture<'a, Vec<T>>,
    {
        let timeout = self.config.provider_timeout;

        for provider in plan {
            let id = provider.id();
            let breaker = self.breakers.get(id);

            if breaker.is_blocking() {
                debug!(provider = %id, domain = %self.domain, "circuit open; skipping provider");
                tally.skipped += 1;
                continue;
            }
            if apply_veto && self.optimizer.should_skip(id) {
                debug!(provider = %id, domain = %self.domain, "provider vetoed by optimizer");
                tally.vetoed += 1;
                continue;
            }

            let call = fetch(Arc::clone(provider));
            let timed = async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::timeout(id, timeout.as_millis() as u64)),
                }
            };
            let result = breaker
                .call(self.optimizer.record_request(id, timed))
                .await;

            match result {
                Ok(items) if !items.is_empty() => {
                    tally.attempted += 1;
                    debug!(
                        provider = %id,
                        domain = %self.domain,
                        capability = %capability,
                        items = items.len(),
                        "provider answered"
                    );
                    return Some(items);
                }
                Ok(_) => {
                    tally.attempted += 1;
                    debug!(
                        provider = %id,
                        domain = %self.domain,
                        capability = %capability,
                        "provider returned no data; trying next"
                    );
                }
                Err(error) if error.is_circuit_open() => {
                    tally.skipped += 1;
                    debug!(provider = %id, domain = %self.domain, error = %error, "provider refused by breaker");
                }
                Err(error) => {
                    tally.attempted += 1;
                    warn!(
                        provider = %id,
                        domain = %self.domain,
                        capability = %capability,
                        code = error.code(),
                        error = %error,
                        "provider call failed"
                    );
                }
            }
        }

        None
    }
}
