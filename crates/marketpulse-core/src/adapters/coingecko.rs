use std::sync::Arc;

use serde_json::Value;

use super::coin_ids::coingecko_id;
use super::{expect_array, records_from, require_symbols};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalizer::as_number;
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol, UtcDateTime};

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko public API (`/coins/markets`, `/coins/{id}/market_chart`).
pub struct CoinGeckoProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    base_url: String,
}

impl CoinGeckoProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::COINGECKO,
        Domain::Crypto,
        1,
        CapabilitySet::new(false, true, true),
    )
    .with_rate_limit(30);

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json(&self, request: HttpRequest) -> Result<Value, SourceError> {
        let id = self.descriptor.id;
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| error.into_source_error(id))?;
        let payload: Value = response.json(id)?;

        if let Some(message) = payload
            .get("status")
            .and_then(|status| status.get("error_message"))
            .and_then(Value::as_str)
        {
            return Err(SourceError::unavailable(format!("coingecko error: {message}")));
        }
        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(SourceError::invalid_request(format!("coingecko error: {message}")));
        }

        Ok(payload)
    }
}

impl MarketDataProvider for CoinGeckoProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let ids = symbols.iter().map(coingecko_id).collect::<Vec<_>>().join(",");
            let request = HttpRequest::get(format!("{}/coins/markets", self.base_url))
                .with_query("vs_currency", "usd")
                .with_query("ids", ids)
                .with_query("price_change_percentage", "24h");

            let payload = self.get_json(request).await?;
            let markets = expect_array(self.descriptor.id, &payload, "markets")?;
            Ok(records_from(self.descriptor.id, Domain::Crypto, markets))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        Box::pin(async move {
            let request = HttpRequest::get(format!(
                "{}/coins/{}/market_chart",
                self.base_url,
                coingecko_id(symbol)
            ))
            .with_query("vs_currency", "usd")
            .with_query("days", range.days().to_string());

            let payload = self.get_json(request).await?;
            parse_market_chart(&payload)
        })
    }
}

/// `{"prices": [[ms, price], ...], "total_volumes": [[ms, volume], ...]}`
fn parse_market_chart(payload: &Value) -> Result<Vec<SeriesPoint>, SourceError> {
    let prices = payload
        .get("prices")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::parse("coingecko market_chart is missing 'prices'"))?;
    let volumes = payload
        .get("total_volumes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let points = prices
        .iter()
        .enumerate()
        .filter_map(|(index, pair)| {
            let millis = pair.get(0)?.as_f64()? as i64;
            let price = as_number(pair.get(1)?)?;
            let volume = volumes
                .get(index)
                .and_then(|entry| entry.get(1))
                .and_then(as_number);
            Some(SeriesPoint {
                timestamp: UtcDateTime::from_unix_millis(millis)?,
                price,
                volume,
            })
        })
        .collect();

    Ok(points)
}
