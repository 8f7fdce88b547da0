//! Alpha Vantage `GLOBAL_QUOTE` and `TIME_SERIES_DAILY`.
//!
//! The free tier allows five calls per minute, so a snapshot fetch quotes at
//! most that many symbols and pauses between the per-symbol requests. Five
//! calls with the default pause finish well inside the registry timeout.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::{records_from, require_symbols};
use crate::clock::{Sleeper, TokioSleeper};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalizer::as_number;
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol, UtcDateTime};

const BASE_URL: &str = "https://www.alphavantage.co";
const DEFAULT_THROTTLE: Duration = Duration::from_millis(1_200);
const CALLS_PER_WINDOW: u32 = 5;

pub struct AlphaVantageProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    api_key: String,
    base_url: String,
    throttle: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl AlphaVantageProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::ALPHAVANTAGE,
        Domain::Stock,
        4,
        CapabilitySet::new(false, true, true),
    )
    .with_key_required()
    .with_rate_limit(CALLS_PER_WINDOW);

    pub fn new(http_client: Arc<dyn HttpClient>, api_key: impl Into<String>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            api_key: api_key.into(),
            base_url: String::from(BASE_URL),
            throttle: DEFAULT_THROTTLE,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Pause inserted between consecutive per-symbol requests.
    pub fn with_throttle(mut self, throttle: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        self.throttle = throttle;
        self.sleeper = sleeper;
        self
    }

    async fn query(&self, function: &str, params: &[(&str, &str)]) -> Result<Value, SourceError> {
        let id = self.descriptor.id;
        let mut request = HttpRequest::get(format!("{}/query", self.base_url))
            .with_query("function", function);
        for (name, value) in params {
            request = request.with_query(*name, *value);
        }
        let request = request.with_query("apikey", self.api_key.as_str());

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| error.into_source_error(id))?;
        let payload: Value = response.json(id)?;

        // Throttling and key problems arrive as 200 with a prose field.
        if let Some(message) = payload
            .get("Note")
            .or_else(|| payload.get("Information"))
            .and_then(Value::as_str)
        {
            return Err(SourceError::rate_limited(format!("alphavantage: {message}")));
        }
        if let Some(message) = payload.get("Error Message").and_then(Value::as_str) {
            return Err(SourceError::invalid_request(format!("alphavantage: {message}")));
        }

        Ok(payload)
    }
}

impl MarketDataProvider for AlphaVantageProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let budget = self
                .descriptor
                .rate_limit_per_window
                .map_or(symbols.len(), |limit| limit as usize);
            if symbols.len() > budget {
                debug!(
                    provider = %self.descriptor.id,
                    requested = symbols.len(),
                    quoted = budget,
                    "symbol list exceeds the per-window call budget; quoting the first symbols only"
                );
            }
            let symbols = &symbols[..symbols.len().min(budget)];

            let mut quotes = Vec::with_capacity(symbols.len());
            for (index, symbol) in symbols.iter().enumerate() {
                if index > 0 && !self.throttle.is_zero() {
                    self.sleeper.sleep(self.throttle).await;
                }

                let mut payload = self
                    .query("GLOBAL_QUOTE", &[("symbol", symbol.as_str())])
                    .await?;
                // Unknown tickers yield an empty "Global Quote" object.
                if let Some(quote) = payload.get_mut("Global Quote").map(Value::take) {
                    quotes.push(quote);
                }
            }

            Ok(records_from(self.descriptor.id, Domain::Stock, &quotes))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        Box::pin(async move {
            // "compact" returns the latest 100 sessions.
            let output_size = if range.days() > 100 { "full" } else { "compact" };
            let payload = self
                .query(
                    "TIME_SERIES_DAILY",
                    &[("symbol", symbol.as_str()), ("outputsize", output_size)],
                )
                .await?;

            let series = payload
                .get("Time Series (Daily)")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    SourceError::parse("alphavantage response is missing 'Time Series (Daily)'")
                })?;

            let cutoff = UtcDateTime::now().into_inner() - range.duration();
            let mut points = series
                .iter()
                .filter_map(|(date, bar)| {
                    let timestamp = UtcDateTime::parse(&format!("{date}T00:00:00Z")).ok()?;
                    Some(SeriesPoint {
                        timestamp,
                        price: as_number(bar.get("4. close")?)?,
                        volume: bar.get("5. volume").and_then(as_number),
                    })
                })
                .filter(|point| point.timestamp.into_inner() >= cutoff)
                .collect::<Vec<_>>();
            points.sort_by_key(|point| point.timestamp);

            Ok(points)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::FixtureHttpClient;
    use crate::clock::RecordingSleeper;
    use crate::config::RegistryConfig;
    use crate::provider::SourceErrorKind;

    #[tokio::test]
    async fn snapshot_throttles_between_symbols() {
        let http = Arc::new(
            FixtureHttpClient::new()
                .respond(
                    200,
                    r#"{"Global Quote":{"01. symbol":"IBM","05. price":"170.10","06. volume":"10","10. change percent":"0.5%"}}"#,
                )
                .respond(200, r#"{"Global Quote":{}}"#)
                .respond(
                    200,
                    r#"{"Global Quote":{"01. symbol":"MSFT","05. price":"410.00"}}"#,
                ),
        );
        let sleeper = RecordingSleeper::new();
        let provider = AlphaVantageProvider::new(http.clone(), "key")
            .with_throttle(Duration::from_millis(500), Arc::new(sleeper.clone()));

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["IBM", "NOPE", "MSFT"]).expect("valid"))
            .await
            .expect("snapshot should succeed");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].change_24h, Some(0.5));
        assert_eq!(sleeper.sleeps(), vec![Duration::from_millis(500); 2]);
        assert_eq!(http.requests().len(), 3);
    }

    #[tokio::test]
    async fn snapshot_quotes_at_most_one_window_of_symbols() {
        let quote = r#"{"Global Quote":{"01. symbol":"X","05. price":"1.00"}}"#;
        let http = Arc::new(
            (0..7).fold(FixtureHttpClient::new(), |fixture, _| fixture.respond(200, quote)),
        );
        let sleeper = RecordingSleeper::new();
        let provider = AlphaVantageProvider::new(http.clone(), "key")
            .with_throttle(DEFAULT_THROTTLE, Arc::new(sleeper.clone()));
        let symbols = Symbol::parse_many(["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "TSLA", "META"])
            .expect("valid");

        let records = provider
            .fetch_snapshot(&symbols)
            .await
            .expect("snapshot should succeed");

        let requested = http
            .requests()
            .iter()
            .filter_map(|request| request.query_value("symbol").map(str::to_owned))
            .collect::<Vec<_>>();
        assert_eq!(requested, vec!["AAPL", "MSFT", "GOOGL", "AMZN", "NVDA"]);
        assert_eq!(records.len(), 5);
        let paused: Duration = sleeper.sleeps().iter().sum();
        assert!(paused < RegistryConfig::default().provider_timeout);
    }

    #[tokio::test]
    async fn rate_limit_note_is_an_error() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"{"Note":"Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#,
        ));
        let provider = AlphaVantageProvider::new(http, "key");

        let error = provider
            .fetch_snapshot(&Symbol::parse_many(["IBM"]).expect("valid"))
            .await
            .expect_err("note must fail");
        assert_eq!(error.kind(), SourceErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn history_is_sorted_and_bounded_by_range() {
        let today = UtcDateTime::now().into_inner().date();
        let yesterday = today.previous_day().expect("valid date");
        let long_ago = today - time::Duration::days(400);
        let body = serde_json::json!({
            "Time Series (Daily)": {
                today.to_string(): { "4. close": "101.0", "5. volume": "5" },
                yesterday.to_string(): { "4. close": "100.0", "5. volume": "4" },
                long_ago.to_string(): { "4. close": "50.0", "5. volume": "1" }
            }
        })
        .to_string();
        let http = Arc::new(FixtureHttpClient::new().respond(200, &body));
        let provider = AlphaVantageProvider::new(http, "key");

        let points = provider
            .fetch_history(&Symbol::parse("IBM").expect("valid"), HistoryRange::SevenDays)
            .await
            .expect("history should succeed");

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].price, 100.0);
        assert_eq!(points[1].price, 101.0);
    }
}
