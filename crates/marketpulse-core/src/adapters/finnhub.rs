use std::sync::Arc;

use serde_json::Value;

use super::{records_from, require_symbols};
use crate::http_client::{Credential, HttpClient, HttpRequest};
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{Domain, MarketRecord, ProviderId, Symbol};

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// Finnhub `/quote`, one request per symbol.
pub struct FinnhubProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    credential: Credential,
    base_url: String,
}

impl FinnhubProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::FINNHUB,
        Domain::Stock,
        2,
        CapabilitySet::snapshot_only(),
    )
    .with_key_required()
    .with_rate_limit(60);

    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            credential: Credential::Header {
                name: "X-Finnhub-Token",
                key: api_key.into(),
            },
            base_url: String::from(BASE_URL),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn quote(&self, symbol: &Symbol) -> Result<Value, SourceError> {
        let id = self.descriptor.id;
        let request = HttpRequest::get(format!("{}/quote", self.base_url))
            .with_query("symbol", symbol.as_str())
            .with_credential(&self.credential);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| error.into_source_error(id))?;
        let mut payload: Value = response.json(id)?;

        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(SourceError::unavailable(format!("finnhub error: {message}")));
        }

        // The quote body carries no ticker; tag it so the normalizer can map it.
        match payload.as_object_mut() {
            Some(object) => {
                object.insert(String::from("symbol"), Value::from(symbol.as_str()));
                Ok(payload)
            }
            None => Err(SourceError::parse("finnhub quote payload is not an object")),
        }
    }
}

impl MarketDataProvider for FinnhubProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let mut quotes = Vec::with_capacity(symbols.len());
            for symbol in symbols {
                quotes.push(self.quote(symbol).await?);
            }

            // Unknown tickers come back as all-zero quotes and are dropped here.
            Ok(records_from(self.descriptor.id, Domain::Stock, &quotes))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::FixtureHttpClient;
    use crate::provider::{Capability, SourceErrorKind};
    use crate::HistoryRange;

    #[tokio::test]
    async fn snapshot_queries_each_symbol_and_tags_it() {
        let http = Arc::new(
            FixtureHttpClient::new()
                .respond(200, r#"{"c":190.5,"d":1.2,"dp":0.63,"pc":189.3,"t":1700000000}"#)
                .respond(200, r#"{"c":0,"d":null,"dp":null,"pc":0,"t":0}"#),
        );
        let provider = FinnhubProvider::new(http.clone(), "token");

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["AAPL", "ZZZZ"]).expect("valid"))
            .await
            .expect("snapshot should succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "AAPL");
        assert_eq!(records[0].change_24h, Some(0.63));

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0].headers.get("x-finnhub-token").map(String::as_str),
            Some("token")
        );
    }

    #[tokio::test]
    async fn invalid_key_is_an_error() {
        let http = Arc::new(FixtureHttpClient::new().respond(401, r#"{"error":"Invalid API key"}"#));
        let provider = FinnhubProvider::new(http, "bad");

        let error = provider
            .fetch_snapshot(&Symbol::parse_many(["AAPL"]).expect("valid"))
            .await
            .expect_err("401 must fail");
        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn history_is_not_supported() {
        let provider = FinnhubProvider::new(Arc::new(FixtureHttpClient::new()), "token");
        assert!(!provider.descriptor().capabilities.supports(Capability::History));

        let error = provider
            .fetch_history(&Symbol::parse("AAPL").expect("valid"), HistoryRange::OneDay)
            .await
            .expect_err("history is unsupported");
        assert_eq!(error.kind(), SourceErrorKind::UnsupportedCapability);
    }
}
