use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use marketpulse_core::http_client::HttpFuture;
use marketpulse_core::{
    built_in_providers, ApiKeys, Capability, Domain, HistoryRange, HttpClient, HttpError,
    HttpRequest, HttpResponse, MarketDataProvider, ProviderId, SourceErrorKind, Symbol,
};

/// Answers every request the same way and counts calls.
struct CannedHttpClient {
    response: Result<HttpResponse, HttpError>,
    calls: AtomicUsize,
}

impl CannedHttpClient {
    fn status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(HttpResponse::with_status(status, "")),
            calls: AtomicUsize::new(0),
        })
    }

    fn transport_error() -> Arc<Self> {
        Arc::new(Self {
            response: Err(HttpError::new("connection reset by peer")),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HttpClient for CannedHttpClient {
    fn execute<'a>(&'a self, _request: HttpRequest) -> HttpFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = self.response.clone();
        Box::pin(async move { response })
    }
}

fn all_keys() -> ApiKeys {
    ProviderId::BUILT_IN
        .into_iter()
        .fold(ApiKeys::new(), |keys, id| keys.with_key(id, "test-key"))
}

fn all_providers(http: Arc<dyn HttpClient>) -> Vec<Arc<dyn MarketDataProvider>> {
    Domain::ALL
        .into_iter()
        .flat_map(|domain| built_in_providers(domain, Arc::clone(&http), &all_keys()))
        .collect()
}

fn ticker_for(domain: Domain) -> Vec<Symbol> {
    let raw = match domain {
        Domain::Crypto => "BTC",
        Domain::Stock => "AAPL",
    };
    vec![Symbol::parse(raw).expect("valid symbol")]
}

#[test]
fn built_in_descriptors_match_the_provider_table() {
    let expected = [
        ("coingecko", Domain::Crypto, 1, "snapshot,history", false),
        ("coincap", Domain::Crypto, 2, "snapshot,history", false),
        ("binance", Domain::Crypto, 3, "live,snapshot,history", false),
        ("cryptocompare", Domain::Crypto, 4, "snapshot,history", true),
        ("yahoo", Domain::Stock, 1, "snapshot,history", false),
        ("finnhub", Domain::Stock, 2, "snapshot", true),
        ("polygon", Domain::Stock, 3, "snapshot", true),
        ("alphavantage", Domain::Stock, 4, "snapshot,history", true),
    ];

    let providers = all_providers(CannedHttpClient::status(200));
    assert_eq!(providers.len(), expected.len());

    for (provider, (id, domain, priority, capabilities, requires_key)) in
        providers.iter().zip(expected)
    {
        let descriptor = provider.descriptor();
        assert_eq!(descriptor.id.as_str(), id);
        assert_eq!(descriptor.domain, domain, "provider '{id}': domain");
        assert_eq!(descriptor.static_priority, priority, "provider '{id}': priority");
        assert_eq!(
            descriptor.capabilities.supported().join(","),
            capabilities,
            "provider '{id}': capabilities"
        );
        assert_eq!(descriptor.requires_key, requires_key, "provider '{id}': key");
        assert_eq!(ProviderId::built_in(id), Some(descriptor.id));
    }
}

#[tokio::test]
async fn upstream_server_errors_surface_as_unavailable() {
    let http = CannedHttpClient::status(503);

    for provider in all_providers(http.clone()) {
        let id = provider.id();
        let symbols = ticker_for(provider.descriptor().domain);
        let error = provider
            .fetch_snapshot(&symbols)
            .await
            .expect_err("a 503 is never an empty success");
        assert_eq!(error.kind(), SourceErrorKind::Unavailable, "provider '{id}'");
        assert!(error.retryable(), "provider '{id}': retryable");
    }
    assert!(http.calls() >= 8);
}

#[tokio::test]
async fn transport_errors_surface_as_errors() {
    let http = CannedHttpClient::transport_error();

    for provider in all_providers(http.clone()) {
        let id = provider.id();
        let symbols = ticker_for(provider.descriptor().domain);
        let error = provider
            .fetch_snapshot(&symbols)
            .await
            .expect_err("transport failure must propagate");
        assert_eq!(error.kind(), SourceErrorKind::Unavailable, "provider '{id}'");
    }
}

#[tokio::test]
async fn empty_symbol_lists_are_rejected_without_a_request() {
    let http = CannedHttpClient::status(200);

    for provider in all_providers(http.clone()) {
        let error = provider
            .fetch_snapshot(&[])
            .await
            .expect_err("empty request");
        assert_eq!(
            error.kind(),
            SourceErrorKind::InvalidRequest,
            "provider '{}'",
            provider.id()
        );
    }
    assert_eq!(http.calls(), 0);
}

#[tokio::test]
async fn providers_without_history_refuse_history_calls() {
    let http = CannedHttpClient::status(200);

    for provider in all_providers(http.clone()) {
        if provider
            .descriptor()
            .capabilities
            .supports(Capability::History)
        {
            continue;
        }
        let symbol = Symbol::parse("AAPL").expect("valid symbol");
        let error = provider
            .fetch_history(&symbol, HistoryRange::SevenDays)
            .await
            .expect_err("history is not supported");
        assert_eq!(error.kind(), SourceErrorKind::UnsupportedCapability);
    }
    assert_eq!(http.calls(), 0);
}
