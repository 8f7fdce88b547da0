//! Yahoo Finance unofficial API.
//!
//! Quote and chart endpoints need a session cookie (kept by the HTTP client's
//! cookie jar) plus a crumb token passed as a query parameter. The crumb is
//! cached for an hour and dropped on 401/403 so the next call refreshes it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{expect_array, records_from, require_symbols};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider::{
    CapabilitySet, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{
    join_symbols, Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol, UtcDateTime,
};

const BASE_URL: &str = "https://query1.finance.yahoo.com";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const REFERER: &str = "https://finance.yahoo.com/";
const CRUMB_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct Crumb {
    value: String,
    fetched_at: Instant,
}

pub struct YahooProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    cookie_url: String,
    crumb: Mutex<Option<Crumb>>,
}

impl YahooProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::YAHOO,
        Domain::Stock,
        1,
        CapabilitySet::new(false, true, true),
    );

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            base_url: String::from(BASE_URL),
            cookie_url: String::from(COOKIE_URL),
            crumb: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.cookie_url = base_url.clone();
        self.base_url = base_url;
        self
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, SourceError> {
        self.http_client
            .execute(request.with_header("referer", REFERER))
            .await
            .map_err(|error| error.into_source_error(self.descriptor.id))
    }

    async fn crumb(&self) -> Result<String, SourceError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            if crumb.fetched_at.elapsed() < CRUMB_TTL {
                return Ok(crumb.value.clone());
            }
        }

        // The cookie response itself is irrelevant; it only seeds the jar.
        let _ = self.execute(HttpRequest::get(self.cookie_url.as_str())).await;

        let response = self
            .execute(HttpRequest::get(format!("{}/v1/test/getcrumb", self.base_url)))
            .await?;
        let body = response.body.trim();
        if response.status == 429 || body.to_ascii_lowercase().contains("too many requests") {
            return Err(SourceError::rate_limited("yahoo rate limited while fetching crumb"));
        }
        let malformed = body.is_empty()
            || body.len() > 100
            || body.contains(|ch: char| ch == '<' || ch.is_whitespace());
        if !response.is_success() || malformed {
            return Err(SourceError::unavailable(format!(
                "yahoo crumb request failed with status {}",
                response.status
            )));
        }

        debug!(provider = %self.descriptor.id, "refreshed yahoo crumb");
        *cached = Some(Crumb {
            value: body.to_owned(),
            fetched_at: Instant::now(),
        });
        Ok(body.to_owned())
    }

    async fn invalidate_crumb(&self) {
        *self.crumb.lock().await = None;
    }

    /// Adds the crumb, performs the call and retries once with a fresh crumb
    /// on an auth rejection.
    async fn get_json(&self, build: impl Fn() -> HttpRequest) -> Result<Value, SourceError> {
        let crumb = self.crumb().await?;
        let response = self.execute(build().with_query("crumb", crumb)).await?;

        let response = if matches!(response.status, 401 | 403) {
            self.invalidate_crumb().await;
            let crumb = self.crumb().await?;
            self.execute(build().with_query("crumb", crumb)).await?
        } else {
            response
        };

        response.json(self.descriptor.id)
    }
}

/// Returns `<root>.result`, failing when `<root>.error` is set.
fn unwrap_envelope<'v>(payload: &'v Value, root: &str) -> Result<&'v Value, SourceError> {
    let envelope = payload
        .get(root)
        .ok_or_else(|| SourceError::parse(format!("yahoo response is missing '{root}'")))?;

    match envelope.get("error") {
        None | Some(Value::Null) => {}
        Some(error) => {
            let description = error
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| error.to_string());
            return Err(SourceError::unavailable(format!("yahoo error: {description}")));
        }
    }

    envelope
        .get("result")
        .ok_or_else(|| SourceError::parse(format!("yahoo '{root}' has no result")))
}

fn chart_range(range: HistoryRange) -> (&'static str, &'static str) {
    match range {
        HistoryRange::OneDay => ("1d", "5m"),
        HistoryRange::SevenDays => ("5d", "30m"),
        HistoryRange::ThirtyDays => ("1mo", "1d"),
        HistoryRange::NinetyDays => ("3mo", "1d"),
        HistoryRange::OneYear => ("1y", "1d"),
    }
}

impl MarketDataProvider for YahooProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let joined = join_symbols(symbols);
            let payload = self
                .get_json(|| {
                    HttpRequest::get(format!("{}/v7/finance/quote", self.base_url))
                        .with_query("symbols", joined.as_str())
                })
                .await?;

            let result = unwrap_envelope(&payload, "quoteResponse")?;
            let quotes = expect_array(self.descriptor.id, result, "quote")?;
            Ok(records_from(self.descriptor.id, Domain::Stock, quotes))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        Box::pin(async move {
            let (span, interval) = chart_range(range);
            let payload = self
                .get_json(|| {
                    HttpRequest::get(format!(
                        "{}/v8/finance/chart/{}",
                        self.base_url,
                        urlencoding::encode(symbol.as_str())
                    ))
                    .with_query("range", span)
                    .with_query("interval", interval)
                })
                .await?;

            let result = unwrap_envelope(&payload, "chart")?;
            let Some(series) = result.as_array().and_then(|items| items.first()) else {
                return Ok(Vec::new());
            };
            Ok(parse_chart(series))
        })
    }
}

/// Zips `timestamp[]` with `indicators.quote[0].close[]`, skipping null closes.
fn parse_chart(series: &Value) -> Vec<SeriesPoint> {
    let timestamps = series
        .get("timestamp")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let quote = series
        .get("indicators")
        .and_then(|indicators| indicators.get("quote"))
        .and_then(|quote| quote.get(0));
    let closes = column(quote, "close");
    let volumes = column(quote, "volume");

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(index, timestamp)| {
            Some(SeriesPoint {
                timestamp: UtcDateTime::from_unix_seconds(timestamp.as_i64()?)?,
                price: closes.get(index)?.as_f64()?,
                volume: volumes.get(index).and_then(Value::as_f64),
            })
        })
        .collect()
}

fn column<'v>(quote: Option<&'v Value>, name: &str) -> &'v [Value] {
    quote
        .and_then(|quote| quote.get(name))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
