//! Behavior-driven tests for provider failover.
//!
//! These tests verify HOW the registry walks its providers: priority order,
//! fallback on failure or silence, breaker and optimizer bookkeeping, and
//! key-based eligibility.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use marketpulse_core::{
    ApiKeys, CapabilitySet, CircuitState, Domain, ManualClock, MarketDataProvider, MarketRecord,
    ProviderDescriptor, ProviderFuture, ProviderId, ProviderRegistry, RegistryConfig,
    RegistryError, SourceError, Symbol, UtcDateTime,
};

enum Script {
    Quotes(Vec<(&'static str, f64)>),
    Fail,
    Stall,
}

struct FakeProvider {
    descriptor: ProviderDescriptor,
    script: Script,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn new(id: &'static str, priority: u32, script: Script) -> Arc<Self> {
        Self::with_descriptor(
            ProviderDescriptor::new(
                ProviderId::new(id),
                Domain::Crypto,
                priority,
                CapabilitySet::snapshot_only(),
            ),
            script,
        )
    }

    fn with_descriptor(descriptor: ProviderDescriptor, script: Script) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MarketDataProvider for FakeProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, _symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            match &self.script {
                Script::Quotes(quotes) => Ok(quotes
                    .iter()
                    .map(|(symbol, price)| MarketRecord {
                        symbol: (*symbol).to_owned(),
                        name: (*symbol).to_owned(),
                        price: *price,
                        change_24h: None,
                        volume: None,
                        market_cap: None,
                        timestamp: UtcDateTime::now(),
                        source: self.descriptor.id.as_str().to_owned(),
                        kind: self.descriptor.domain,
                    })
                    .collect()),
                Script::Fail => Err(SourceError::unavailable("upstream returned status 503")),
                Script::Stall => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
            }
        })
    }
}

fn crypto_registry(providers: &[Arc<FakeProvider>]) -> ProviderRegistry {
    providers
        .iter()
        .fold(ProviderRegistry::builder(Domain::Crypto), |builder, provider| {
            builder.provider(Arc::clone(provider) as Arc<dyn MarketDataProvider>)
        })
        .clock(Arc::new(ManualClock::new()))
        .config(RegistryConfig {
            provider_timeout: Duration::from_millis(50),
        })
        .build()
}

fn btc_eth() -> Vec<Symbol> {
    Symbol::parse_many(["BTC", "ETH"]).expect("valid symbols")
}

// =============================================================================
// Registry: Priority Order
// =============================================================================

#[tokio::test]
async fn when_first_provider_answers_later_providers_are_never_called() {
    // Given: two healthy providers
    let first = FakeProvider::new("first", 1, Script::Quotes(vec![("BTC", 1.0)]));
    let second = FakeProvider::new("second", 2, Script::Quotes(vec![("BTC", 2.0)]));
    let registry = crypto_registry(&[second.clone(), first.clone()]);

    // When: a snapshot is requested
    let records = registry.fetch_snapshot(&btc_eth()).await.expect("data");

    // Then: the lower static priority wins regardless of registration order
    assert_eq!(records[0].source, "first");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
}

// =============================================================================
// Registry: Failover
// =============================================================================

#[tokio::test]
async fn when_primary_times_out_secondary_serves_and_bookkeeping_is_updated() {
    // Given: A stalls past the call timeout, B answers
    let a = FakeProvider::new("a", 1, Script::Stall);
    let b = FakeProvider::new(
        "b",
        2,
        Script::Quotes(vec![("BTC", 65_000.0), ("ETH", 3_200.0)]),
    );
    let registry = crypto_registry(&[a.clone(), b.clone()]);

    // When: a snapshot is requested
    let records = registry.fetch_snapshot(&btc_eth()).await.expect("data");

    // Then: B's records come back tagged with B as source
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].symbol, "BTC");
    assert_eq!(records[0].price, 65_000.0);
    assert_eq!(records[1].symbol, "ETH");
    assert_eq!(records[1].price, 3_200.0);
    assert!(records.iter().all(|record| record.source == "b"));

    // And: the timeout counted against A's breaker and metrics
    let a_breaker = registry
        .breakers()
        .snapshot(ProviderId::new("a"))
        .expect("a was called");
    assert_eq!(a_breaker.state, CircuitState::Closed);
    assert_eq!(a_breaker.failure_count, 1);
    let a_metrics = registry
        .optimizer()
        .snapshot(ProviderId::new("a"))
        .expect("a metrics");
    assert_eq!(a_metrics.consecutive_failures, 1);

    // And: B's success carries a response time sample
    let b_metrics = registry
        .optimizer()
        .snapshot(ProviderId::new("b"))
        .expect("b metrics");
    assert_eq!(b_metrics.samples, 1);
    assert!(b_metrics.average_response_ms.is_some());
    assert_eq!(b_metrics.consecutive_failures, 0);
}

#[tokio::test]
async fn when_every_provider_fails_the_domain_is_reported_exhausted() {
    // Given: two failing providers
    let a = FakeProvider::new("a", 1, Script::Fail);
    let b = FakeProvider::new("b", 2, Script::Fail);
    let registry = crypto_registry(&[a.clone(), b.clone()]);

    // When: a snapshot is requested
    let error = registry
        .fetch_snapshot(&btc_eth())
        .await
        .expect_err("nothing answered");

    // Then: both were tried and the error names the domain
    assert_eq!(
        error,
        RegistryError::AllProvidersExhausted {
            domain: Domain::Crypto,
            attempted: 2,
            skipped: 0,
        }
    );
    assert_eq!(error.code(), "registry.all_providers_exhausted");
    assert_eq!((a.calls(), b.calls()), (1, 1));
}

#[tokio::test]
async fn when_every_provider_is_vetoed_the_walk_runs_again_without_the_veto() {
    // Given: both providers carry ten consecutive recorded failures
    let a = FakeProvider::new("a", 1, Script::Quotes(vec![("BTC", 1.0)]));
    let b = FakeProvider::new("b", 2, Script::Quotes(vec![("BTC", 2.0)]));
    let registry = crypto_registry(&[a.clone(), b.clone()]);
    for _ in 0..10 {
        registry.optimizer().record_failure(ProviderId::new("a"));
        registry.optimizer().record_failure(ProviderId::new("b"));
    }
    assert!(registry.optimizer().should_skip(ProviderId::new("a")));
    assert!(registry.optimizer().should_skip(ProviderId::new("b")));

    // When: a snapshot is requested
    let records = registry.fetch_snapshot(&btc_eth()).await.expect("data");

    // Then: a provider is still attempted rather than failing with zero attempts
    assert_eq!(records.len(), 1);
    assert_eq!(a.calls() + b.calls(), 1);
}

#[tokio::test]
async fn when_every_provider_is_vetoed_and_still_failing_the_domain_is_exhausted() {
    // Given: two failing providers, both vetoed for mostly failing past twenty requests
    let a = FakeProvider::new("a", 1, Script::Fail);
    let b = FakeProvider::new("b", 2, Script::Fail);
    let registry = crypto_registry(&[a.clone(), b.clone()]);
    for id in [ProviderId::new("a"), ProviderId::new("b")] {
        for _ in 0..2 {
            for _ in 0..9 {
                registry.optimizer().record_failure(id);
            }
            registry.optimizer().record_success(id, Duration::from_millis(50));
        }
        registry.optimizer().record_failure(id);
        assert!(registry.optimizer().should_skip(id));
    }

    // When: a snapshot is requested
    let error = registry
        .fetch_snapshot(&btc_eth())
        .await
        .expect_err("nothing answered");

    // Then: the unvetoed pass tried each provider once and reports only those attempts
    assert_eq!(
        error,
        RegistryError::AllProvidersExhausted {
            domain: Domain::Crypto,
            attempted: 2,
            skipped: 0,
        }
    );
    assert_eq!((a.calls(), b.calls()), (1, 1));
}

// =============================================================================
// Registry: Eligibility
// =============================================================================

#[tokio::test]
async fn when_a_required_key_is_missing_the_provider_is_excluded() {
    // Given: a key-requiring provider without a key, and a keyless fallback
    let keyed = FakeProvider::with_descriptor(
        ProviderDescriptor::new(
            ProviderId::new("keyed"),
            Domain::Crypto,
            1,
            CapabilitySet::snapshot_only(),
        )
        .with_key_required(),
        Script::Quotes(vec![("BTC", 1.0)]),
    );
    let open = FakeProvider::new("open", 2, Script::Quotes(vec![("BTC", 2.0)]));
    let registry = ProviderRegistry::builder(Domain::Crypto)
        .provider(keyed.clone())
        .provider(open.clone())
        .keys(Arc::new(ApiKeys::new()))
        .build();

    // When: a snapshot is requested
    let records = registry.fetch_snapshot(&btc_eth()).await.expect("data");

    // Then: the keyed provider is never called
    assert_eq!(records[0].source, "open");
    assert_eq!(keyed.calls(), 0);

    let status = registry.provider_status();
    let keyed_status = status
        .iter()
        .find(|entry| entry.id == ProviderId::new("keyed"))
        .expect("listed");
    assert!(keyed_status.requires_key);
    assert!(!keyed_status.key_present);
}

#[tokio::test]
async fn when_only_keyed_providers_lack_keys_no_provider_is_eligible() {
    // Given: a single key-requiring provider and no keys
    let keyed = FakeProvider::with_descriptor(
        ProviderDescriptor::new(
            ProviderId::new("keyed"),
            Domain::Crypto,
            1,
            CapabilitySet::snapshot_only(),
        )
        .with_key_required(),
        Script::Quotes(vec![("BTC", 1.0)]),
    );
    let registry = ProviderRegistry::builder(Domain::Crypto)
        .provider(keyed)
        .build();

    // When / Then: the failure is distinguishable from exhaustion
    let error = registry
        .fetch_snapshot(&btc_eth())
        .await
        .expect_err("nothing eligible");
    assert_eq!(
        error,
        RegistryError::NoEligibleProviders {
            domain: Domain::Crypto
        }
    );
}

#[tokio::test]
async fn when_keys_are_supplied_the_keyed_provider_takes_part() {
    // Given: the key-requiring provider has its key
    let keyed = FakeProvider::with_descriptor(
        ProviderDescriptor::new(
            ProviderId::new("keyed"),
            Domain::Crypto,
            1,
            CapabilitySet::snapshot_only(),
        )
        .with_key_required(),
        Script::Quotes(vec![("BTC", 1.0)]),
    );
    let registry = ProviderRegistry::builder(Domain::Crypto)
        .provider(keyed.clone())
        .keys(Arc::new(ApiKeys::new().with_key(ProviderId::new("keyed"), "secret")))
        .build();

    // When: a snapshot is requested
    let records = registry.fetch_snapshot(&btc_eth()).await.expect("data");

    // Then: it serves the request
    assert_eq!(records[0].source, "keyed");
    assert_eq!(keyed.calls(), 1);
}
