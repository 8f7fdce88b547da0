use std::sync::Arc;

use serde_json::Value;

use super::{expect_array, records_from, require_symbols};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{join_symbols, Domain, MarketRecord, ProviderId, Symbol};

const BASE_URL: &str = "https://api.polygon.io";

/// Polygon full-market snapshot endpoint filtered by ticker list.
pub struct PolygonProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    base_url: String,
}

impl PolygonProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::POLYGON,
        Domain::Stock,
        3,
        CapabilitySet::snapshot_only(),
    )
    .with_key_required()
    .with_rate_limit(5);

    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            api_key: api_key.into(),
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl MarketDataProvider for PolygonProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;
            let id = self.descriptor.id;

            let request = HttpRequest::get(format!(
                "{}/v2/snapshot/locale/us/markets/stocks/tickers",
                self.base_url
            ))
            .with_query("tickers", join_symbols(symbols))
            .with_query("apiKey", self.api_key.as_str());

            let response = self
                .http_client
                .execute(request)
                .await
                .map_err(|error| error.into_source_error(id))?;
            let payload: Value = response.json(id)?;

            match payload.get("status").and_then(Value::as_str) {
                Some("OK") | None => {}
                Some(status) => {
                    let message = payload
                        .get("error")
                        .or_else(|| payload.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or(status);
                    return Err(SourceError::unavailable(format!("polygon error: {message}")));
                }
            }

            // An empty market (weekend, unknown tickers) omits `tickers` entirely.
            let Some(tickers) = payload.get("tickers") else {
                return Ok(Vec::new());
            };
            let tickers = expect_array(id, tickers, "tickers")?;
            Ok(records_from(id, Domain::Stock, tickers))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::FixtureHttpClient;
    use crate::provider::SourceErrorKind;

    #[tokio::test]
    async fn snapshot_reads_tickers_array() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"status":"OK","tickers":[{"ticker":"AAPL","todaysChangePerc":0.5,"day":{"c":190.0,"v":100}}]}"#,
        ));
        let provider = PolygonProvider::new(http.clone(), "key");

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["AAPL"]).expect("valid"))
            .await
            .expect("snapshot should succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].price, 190.0);
        assert_eq!(records[0].volume, Some(19_000.0));
        assert!(http.requests()[0]
            .query
            .contains(&(String::from("apiKey"), String::from("key"))));
    }

    #[tokio::test]
    async fn status_error_is_an_error() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"status":"NOT_AUTHORIZED","message":"You are not entitled to this data."}"#,
        ));
        let provider = PolygonProvider::new(http, "key");

        let error = provider
            .fetch_snapshot(&Symbol::parse_many(["AAPL"]).expect("valid"))
            .await
            .expect_err("status error must fail");
        assert_eq!(error.kind(), SourceErrorKind::Unavailable);
        assert!(error.message().contains("not entitled"));
    }

    #[tokio::test]
    async fn missing_tickers_is_empty_success() {
        let http = Arc::new(FixtureHttpClient::new().respond(200, r#"{"status":"OK","count":0}"#));
        let provider = PolygonProvider::new(http, "key");

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["AAPL"]).expect("valid"))
            .await
            .expect("empty market is not a failure");
        assert!(records.is_empty());
    }
}
