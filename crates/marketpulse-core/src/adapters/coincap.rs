use std::sync::Arc;

use serde_json::Value;

use super::coin_ids::coincap_id;
use super::{expect_array, records_from, require_symbols};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalizer::as_number;
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol, UtcDateTime};

const BASE_URL: &str = "https://api.coincap.io/v2";

/// CoinCap v2 REST API. Numeric fields arrive as strings.
pub struct CoinCapProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    base_url: String,
}

impl CoinCapProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::COINCAP,
        Domain::Crypto,
        2,
        CapabilitySet::new(false, true, true),
    )
    .with_rate_limit(200);

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

    /// Returns the `data` member of a CoinCap envelope.
    async fn get_data(&self, request: HttpRequest) -> Result<Value, SourceError> {
        let id = self.descriptor.id;
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| error.into_source_error(id))?;
        let mut payload: Value = response.json(id)?;

        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(SourceError::unavailable(format!("coincap error: {message}")));
        }

        payload
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| SourceError::parse("coincap response is missing 'data'"))
    }
}

/// Candle interval that keeps a range's point count reasonable.
fn interval_for(range: HistoryRange) -> &'static str {
    match range {
        HistoryRange::OneDay => "m15",
        HistoryRange::SevenDays => "h2",
        HistoryRange::ThirtyDays | HistoryRange::NinetyDays | HistoryRange::OneYear => "d1",
    }
}

impl MarketDataProvider for CoinCapProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let ids = symbols.iter().map(coincap_id).collect::<Vec<_>>().join(",");
            let request =
                HttpRequest::get(format!("{}/assets", self.base_url)).with_query("ids", ids);

            let data = self.get_data(request).await?;
            let assets = expect_array(self.descriptor.id, &data, "assets")?;
            Ok(records_from(self.descriptor.id, Domain::Crypto, assets))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        Box::pin(async move {
            let end = UtcDateTime::now().unix_millis();
            let start = end - range.duration().whole_milliseconds() as i64;
            let request = HttpRequest::get(format!(
                "{}/assets/{}/history",
                self.base_url,
                coincap_id(symbol)
            ))
            .with_query("interval", interval_for(range))
            .with_query("start", start.to_string())
            .with_query("end", end.to_string());

            let data = self.get_data(request).await?;
            let rows = expect_array(self.descriptor.id, &data, "history")?;

            Ok(rows
                .iter()
                .filter_map(|row| {
                    let millis = row.get("time")?.as_i64()?;
                    Some(SeriesPoint {
                        timestamp: UtcDateTime::from_unix_millis(millis)?,
                        price: as_number(row.get("priceUsd")?)?,
                        volume: None,
                    })
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::FixtureHttpClient;
    use crate::provider::SourceErrorKind;

    #[tokio::test]
    async fn snapshot_reads_data_envelope() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"data":[{"id":"bitcoin","symbol":"BTC","name":"Bitcoin","priceUsd":"65000.10","changePercent24Hr":"-0.5"}],"timestamp":1}"#,
        ));
        let provider = CoinCapProvider::new(http.clone());

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["BTC"]).expect("valid"))
            .await
            .expect("snapshot should succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, 65000.10);
        assert_eq!(records[0].change_24h, Some(-0.5));
        assert!(http.requests()[0].url.ends_with("/assets"));
    }

    #[tokio::test]
    async fn empty_data_is_a_successful_empty_batch() {
        let http = Arc::new(FixtureHttpClient::new().respond(200, r#"{"data":[]}"#));
        let provider = CoinCapProvider::new(http);

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["NOPE"]).expect("valid"))
            .await
            .expect("empty data is not a failure");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn error_envelope_and_transport_failures_are_errors() {
        let http = Arc::new(
            FixtureHttpClient::new()
                .respond(200, r#"{"error":"rate limit exceeded"}"#)
                .fail("connection reset"),
        );
        let provider = CoinCapProvider::new(http);
        let symbols = Symbol::parse_many(["BTC"]).expect("valid");

        let first = provider.fetch_snapshot(&symbols).await;
        assert_eq!(first.map_err(|e| e.kind()), Err(SourceErrorKind::Unavailable));

        let second = provider.fetch_snapshot(&symbols).await;
        assert_eq!(second.map_err(|e| e.kind()), Err(SourceErrorKind::Unavailable));
    }

    #[tokio::test]
    async fn history_uses_range_interval() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"data":[{"priceUsd":"100.5","time":1700000000000},{"priceUsd":"bad","time":1700000000001}]}"#,
        ));
        let provider = CoinCapProvider::new(http.clone());

        let points = provider
            .fetch_history(&Symbol::parse("ETH").expect("valid"), HistoryRange::OneDay)
            .await
            .expect("history should succeed");

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].price, 100.5);
        assert!(http.requests()[0]
            .query
            .contains(&(String::from("interval"), String::from("m15"))));
    }
}
