//! Built-in market data providers.
//!
//! | Provider | Domain | Priority | Capabilities | Key |
//! |----------|--------|----------|--------------|-----|
//! | [`CoinGeckoProvider`] | crypto | 1 | snapshot, history | no |
//! | [`CoinCapProvider`] | crypto | 2 | snapshot, history | no |
//! | [`BinanceProvider`] | crypto | 3 | snapshot, history, live | no |
//! | [`CryptoCompareProvider`] | crypto | 4 | snapshot, history | yes |
//! | [`YahooProvider`] | stock | 1 | snapshot, history | no |
//! | [`FinnhubProvider`] | stock | 2 | snapshot | yes |
//! | [`PolygonProvider`] | stock | 3 | snapshot | yes |
//! | [`AlphaVantageProvider`] | stock | 4 | snapshot, history | yes |
//!
//! Adapters only build requests and split responses into per-symbol raw
//! objects. Breakers, metrics and timeouts are applied by the registry.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::{ApiKeys, KeyProvider};
use crate::http_client::HttpClient;
use crate::normalizer::normalize_at;
use crate::provider::{MarketDataProvider, SourceError};
use crate::{Domain, MarketRecord, ProviderId, Symbol, UtcDateTime};

pub mod alphavantage;
pub mod binance;
pub mod coin_ids;
pub mod coincap;
pub mod coingecko;
pub mod cryptocompare;
pub mod finnhub;
pub mod polygon;
pub mod yahoo;

pub use alphavantage::AlphaVantageProvider;
pub use binance::BinanceProvider;
pub use coincap::CoinCapProvider;
pub use coingecko::CoinGeckoProvider;
pub use cryptocompare::CryptoCompareProvider;
pub use finnhub::FinnhubProvider;
pub use polygon::PolygonProvider;
pub use yahoo::YahooProvider;

/// Instantiates every built-in provider for `domain` in static priority order.
///
/// Providers whose key is missing are still returned; the registry filters
/// them out by descriptor.
pub fn built_in_providers(
    domain: Domain,
    http_client: Arc<dyn HttpClient>,
    keys: &ApiKeys,
) -> Vec<Arc<dyn MarketDataProvider>> {
    let key = |id: ProviderId| keys.api_key(id).unwrap_or_default().to_owned();

    match domain {
        Domain::Crypto => vec![
            Arc::new(CoinGeckoProvider::new(Arc::clone(&http_client))),
            Arc::new(CoinCapProvider::new(Arc::clone(&http_client))),
            Arc::new(BinanceProvider::new(Arc::clone(&http_client))),
            Arc::new(CryptoCompareProvider::new(
                http_client,
                key(ProviderId::CRYPTOCOMPARE),
            )),
        ],
        Domain::Stock => vec![
            Arc::new(YahooProvider::new(Arc::clone(&http_client))),
            Arc::new(FinnhubProvider::new(
                Arc::clone(&http_client),
                key(ProviderId::FINNHUB),
            )),
            Arc::new(PolygonProvider::new(
                Arc::clone(&http_client),
                key(ProviderId::POLYGON),
            )),
            Arc::new(AlphaVantageProvider::new(
                http_client,
                key(ProviderId::ALPHAVANTAGE),
            )),
        ],
    }
}

/// Normalizes raw per-symbol objects, dropping entries without a usable price.
pub(crate) fn records_from<'v>(
    provider: ProviderId,
    kind: Domain,
    raws: impl IntoIterator<Item = &'v Value>,
) -> Vec<MarketRecord> {
    let timestamp = UtcDateTime::now();
    raws.into_iter()
        .map(|raw| normalize_at(raw, provider.as_str(), kind, timestamp))
        .filter(|record| {
            let usable = record.has_price();
            if !usable {
                debug!(provider = %provider, symbol = %record.symbol, "dropping record without price");
            }
            usable
        })
        .collect()
}

pub(crate) fn require_symbols(provider: ProviderId, symbols: &[Symbol]) -> Result<(), SourceError> {
    if symbols.is_empty() {
        return Err(SourceError::invalid_request(format!(
            "{provider} snapshot request requires at least one symbol"
        )));
    }
    Ok(())
}

pub(crate) fn expect_array<'v>(
    provider: ProviderId,
    value: &'v Value,
    what: &str,
) -> Result<&'v Vec<Value>, SourceError> {
    value
        .as_array()
        .ok_or_else(|| SourceError::parse(format!("{provider} {what} payload is not an array")))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::ReqwestHttpClient;

    #[test]
    fn built_in_providers_follow_static_priority() {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
        let keys = ApiKeys::new();

        for domain in Domain::ALL {
            let providers = built_in_providers(domain, Arc::clone(&http), &keys);
            assert_eq!(providers.len(), 4);
            let priorities = providers
                .iter()
                .map(|provider| provider.descriptor().static_priority)
                .collect::<Vec<_>>();
            assert_eq!(priorities, vec![1, 2, 3, 4]);
            assert!(providers
                .iter()
                .all(|provider| provider.descriptor().domain == domain));
        }
    }

    #[test]
    fn records_without_price_are_dropped() {
        let raws = [
            serde_json::json!({ "symbol": "btc", "current_price": 65000.0 }),
            serde_json::json!({ "symbol": "eth" }),
        ];
        let records = records_from(ProviderId::COINGECKO, Domain::Crypto, raws.iter());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "BTC");
    }
}
