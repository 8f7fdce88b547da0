use std::sync::Arc;

use serde_json::Value;

use super::{records_from, require_symbols};
use crate::http_client::{Credential, HttpClient, HttpRequest};
use crate::normalizer::as_number;
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{
    join_symbols, Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol, UtcDateTime,
};

const BASE_URL: &str = "https://min-api.cryptocompare.com/data";

/// CryptoCompare min-api, authenticated with an `Apikey` authorization header.
pub struct CryptoCompareProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    credential: Credential,
    base_url: String,
}

impl CryptoCompareProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::CRYPTOCOMPARE,
        Domain::Crypto,
        4,
        CapabilitySet::new(false, true, true),
    )
    .with_key_required()
    .with_rate_limit(50);

    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            credential: Credential::Authorization {
                scheme: "Apikey",
                key: api_key.into(),
            },
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
            .execute(request.with_credential(&self.credential))
            .await
            .map_err(|error| error.into_source_error(id))?;
        let payload: Value = response.json(id)?;

        // {"Response": "Error", "Message": "..."} arrives with status 200.
        if payload.get("Response").and_then(Value::as_str) == Some("Error") {
            let message = payload
                .get("Message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(if message.to_ascii_lowercase().contains("rate limit") {
                SourceError::rate_limited(format!("cryptocompare: {message}"))
            } else {
                SourceError::unavailable(format!("cryptocompare: {message}"))
            });
        }

        Ok(payload)
    }
}

impl MarketDataProvider for CryptoCompareProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let request = HttpRequest::get(format!("{}/pricemultifull", self.base_url))
                .with_query("fsyms", join_symbols(symbols))
                .with_query("tsyms", "USD");

            let payload = self.get_json(request).await?;
            let raw = payload
                .get("RAW")
                .and_then(Value::as_object)
                .ok_or_else(|| SourceError::parse("cryptocompare response is missing 'RAW'"))?;

            // RAW.<FSYM>.USD holds the per-symbol object.
            let quotes = symbols
                .iter()
                .filter_map(|symbol| raw.get(symbol.as_str())?.get("USD"));
            Ok(records_from(self.descriptor.id, Domain::Crypto, quotes))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        Box::pin(async move {
            let (endpoint, limit) = match range {
                HistoryRange::OneDay => ("histohour", 24),
                other => ("histoday", other.days()),
            };
            let request = HttpRequest::get(format!("{}/v2/{endpoint}", self.base_url))
                .with_query("fsym", symbol.as_str())
                .with_query("tsym", "USD")
                .with_query("limit", limit.to_string());

            let payload = self.get_json(request).await?;
            let rows = payload
                .get("Data")
                .and_then(|data| data.get("Data"))
                .and_then(Value::as_array)
                .ok_or_else(|| SourceError::parse("cryptocompare history is missing 'Data.Data'"))?;

            Ok(rows
                .iter()
                .filter_map(|row| {
                    let seconds = row.get("time")?.as_i64()?;
                    Some(SeriesPoint {
                        timestamp: UtcDateTime::from_unix_seconds(seconds)?,
                        price: as_number(row.get("close")?)?,
                        volume: row.get("volumeto").and_then(as_number),
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
    async fn snapshot_walks_raw_fsym_tsym_tree_and_sends_key() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"RAW":{"BTC":{"USD":{"FROMSYMBOL":"BTC","PRICE":65000,"CHANGEPCT24HOUR":1.2,"VOLUME24HOURTO":5,"MKTCAP":9}}}}"#,
        ));
        let provider = CryptoCompareProvider::new(http.clone(), "secret");

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["BTC", "ETH"]).expect("valid"))
            .await
            .expect("snapshot should succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].market_cap, Some(9.0));
        assert_eq!(
            http.requests()[0].headers.get("authorization").map(String::as_str),
            Some("Apikey secret")
        );
    }

    #[tokio::test]
    async fn error_response_with_200_is_an_error() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"Response":"Error","Message":"You are over your rate limit please upgrade"}"#,
        ));
        let provider = CryptoCompareProvider::new(http, "secret");

        let error = provider
            .fetch_snapshot(&Symbol::parse_many(["BTC"]).expect("valid"))
            .await
            .expect_err("error payload must fail");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn history_reads_nested_data() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"Response":"Success","Data":{"Data":[{"time":1700000000,"close":64000.5,"volumeto":12.0}]}}"#,
        ));
        let provider = CryptoCompareProvider::new(http.clone(), "secret");

        let points = provider
            .fetch_history(&Symbol::parse("BTC").expect("valid"), HistoryRange::ThirtyDays)
            .await
            .expect("history should succeed");

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].timestamp.unix_millis(), 1_700_000_000_000);
        assert!(http.requests()[0].url.ends_with("/v2/histoday"));
    }
}
