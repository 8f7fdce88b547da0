//! Binance spot market: REST snapshot/history plus a WebSocket mini-ticker feed.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::coin_ids::binance_pair;
use super::{expect_array, records_from, require_symbols};
use crate::http_client::{HttpClient, HttpRequest};
use crate::normalizer::{as_number, normalize};
use crate::provider::{
    CapabilitySet, LiveFeed, MarketDataProvider, ProviderDescriptor, ProviderFuture, SourceError,
};
use crate::{Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol, UtcDateTime};

const REST_URL: &str = "https://api.binance.com/api/v3";
const WS_URL: &str = "wss://stream.binance.com:9443/stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const FEED_BUFFER: usize = 256;

pub struct BinanceProvider {
    descriptor: ProviderDescriptor,
    http_client: Arc<dyn HttpClient>,
    rest_url: String,
    ws_url: String,
}

impl BinanceProvider {
    pub const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor::new(
        ProviderId::BINANCE,
        Domain::Crypto,
        3,
        CapabilitySet::new(true, true, true),
    )
    .with_rate_limit(1_200);

    pub fn new(http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            descriptor: Self::DESCRIPTOR,
            http_client,
            rest_url: String::from(REST_URL),
            ws_url: String::from(WS_URL),
        }
    }

    pub fn with_urls(mut self, rest_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        self.rest_url = rest_url.into();
        self.ws_url = ws_url.into();
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

        // {"code": -1121, "msg": "Invalid symbol."}
        if let (Some(code), Some(message)) = (
            payload.get("code").and_then(Value::as_i64),
            payload.get("msg").and_then(Value::as_str),
        ) {
            return Err(SourceError::invalid_request(format!(
                "binance error {code}: {message}"
            )));
        }

        Ok(payload)
    }

    fn stream_url(&self, symbols: &[Symbol]) -> String {
        let streams = symbols
            .iter()
            .map(|symbol| format!("{}@miniTicker", binance_pair(symbol).to_ascii_lowercase()))
            .collect::<Vec<_>>()
            .join("/");
        format!("{}?streams={streams}", self.ws_url)
    }
}

/// Kline interval and bar count covering a range.
fn kline_plan(range: HistoryRange) -> (&'static str, u32) {
    match range {
        HistoryRange::OneDay => ("15m", 96),
        HistoryRange::SevenDays => ("1h", 168),
        HistoryRange::ThirtyDays => ("4h", 180),
        HistoryRange::NinetyDays => ("1d", 90),
        HistoryRange::OneYear => ("1d", 365),
    }
}

impl MarketDataProvider for BinanceProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let pairs = symbols
                .iter()
                .map(|symbol| format!("\"{}\"", binance_pair(symbol)))
                .collect::<Vec<_>>()
                .join(",");
            let request = HttpRequest::get(format!("{}/ticker/24hr", self.rest_url))
                .with_query("symbols", format!("[{pairs}]"));

            let payload = self.get_json(request).await?;
            let tickers = expect_array(self.descriptor.id, &payload, "ticker")?;
            Ok(records_from(self.descriptor.id, Domain::Crypto, tickers))
        })
    }

    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        Box::pin(async move {
            let (interval, limit) = kline_plan(range);
            let request = HttpRequest::get(format!("{}/klines", self.rest_url))
                .with_query("symbol", binance_pair(symbol))
                .with_query("interval", interval)
                .with_query("limit", limit.to_string());

            let payload = self.get_json(request).await?;
            let klines = expect_array(self.descriptor.id, &payload, "klines")?;

            // [open_time, open, high, low, close, volume, close_time, quote_volume, ...]
            Ok(klines
                .iter()
                .filter_map(|kline| {
                    let row = kline.as_array()?;
                    let open_time = row.first()?.as_i64()?;
                    Some(SeriesPoint {
                        timestamp: UtcDateTime::from_unix_millis(open_time)?,
                        price: as_number(row.get(4)?)?,
                        volume: row.get(7).and_then(as_number),
                    })
                })
                .collect())
        })
    }

    fn connect<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, LiveFeed> {
        Box::pin(async move {
            require_symbols(self.descriptor.id, symbols)?;

            let id = self.descriptor.id;
            let url = self.stream_url(symbols);
            let (stream, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
                .await
                .map_err(|_| SourceError::timeout(id, CONNECT_TIMEOUT.as_millis() as u64))?
                .map_err(|error| {
                    SourceError::unavailable(format!("binance websocket connect failed: {error}"))
                })?;

            info!(provider = %id, streams = symbols.len(), "live feed connected");

            let (sender, receiver) = mpsc::channel(FEED_BUFFER);
            let task = tokio::spawn(async move {
                let (mut write, mut read) = stream.split();
                while let Some(message) = read.next().await {
                    match message {
                        Ok(Message::Text(text)) => {
                            let Some(record) = parse_stream_message(&text) else {
                                debug!(provider = %id, "ignoring unrecognised stream message");
                                continue;
                            };
                            if sender.send(record).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            warn!(provider = %id, "live feed closed by server");
                            break;
                        }
                        Ok(_) => {}
                        Err(error) => {
                            warn!(provider = %id, error = %error, "live feed error");
                            break;
                        }
                    }
                }
                debug!(provider = %id, "live feed task finished");
            });

            Ok(LiveFeed::new(id, receiver, task))
        })
    }
}

/// Combined-stream envelope: `{"stream": "btcusdt@miniTicker", "data": {...}}`.
fn parse_stream_message(text: &str) -> Option<MarketRecord> {
    let envelope: Value = serde_json::from_str(text).ok()?;
    let data = envelope.get("data").unwrap_or(&envelope);
    let record = normalize(data, ProviderId::BINANCE.as_str(), Domain::Crypto);
    record.has_price().then_some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fixtures::FixtureHttpClient;
    use crate::provider::SourceErrorKind;

    #[tokio::test]
    async fn snapshot_requests_usdt_pairs() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"[{"symbol":"BTCUSDT","lastPrice":"65000.00","priceChangePercent":"1.0","quoteVolume":"10"}]"#,
        ));
        let provider = BinanceProvider::new(http.clone());

        let records = provider
            .fetch_snapshot(&Symbol::parse_many(["BTC", "ETH"]).expect("valid"))
            .await
            .expect("snapshot should succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].symbol, "BTC");
        assert!(http.requests()[0].query.contains(&(
            String::from("symbols"),
            String::from(r#"["BTCUSDT","ETHUSDT"]"#)
        )));
    }

    #[tokio::test]
    async fn api_error_payload_is_invalid_request() {
        let http = Arc::new(
            FixtureHttpClient::new().respond(200, r#"{"code":-1121,"msg":"Invalid symbol."}"#),
        );
        let provider = BinanceProvider::new(http);

        let error = provider
            .fetch_snapshot(&Symbol::parse_many(["NOPE"]).expect("valid"))
            .await
            .expect_err("error payload must fail");
        assert_eq!(error.kind(), SourceErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn history_reads_close_and_quote_volume() {
        let http = Arc::new(FixtureHttpClient::new().respond(
            200,
            r#"[[1700000000000,"1.0","2.0","0.5","1.5","100","1700000899999","150.0",10,"0","0","0"]]"#,
        ));
        let provider = BinanceProvider::new(http);

        let points = provider
            .fetch_history(&Symbol::parse("BTC").expect("valid"), HistoryRange::OneDay)
            .await
            .expect("history should succeed");

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].price, 1.5);
        assert_eq!(points[0].volume, Some(150.0));
    }

    #[test]
    fn stream_url_joins_lowercase_mini_ticker_streams() {
        let provider = BinanceProvider::new(Arc::new(FixtureHttpClient::new()));
        let url = provider.stream_url(&Symbol::parse_many(["BTC", "ETH"]).expect("valid"));
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@miniTicker/ethusdt@miniTicker"
        );
    }

    #[test]
    fn stream_message_becomes_record() {
        let text = r#"{"stream":"ethusdt@miniTicker","data":{"e":"24hrMiniTicker","s":"ETHUSDT","c":"3200.5","o":"3000","q":"1000"}}"#;
        let record = parse_stream_message(text).expect("mini ticker should parse");
        assert_eq!(record.symbol, "ETH");
        assert_eq!(record.price, 3200.5);
        assert_eq!(record.source, "binance");

        assert!(parse_stream_message(r#"{"result":null,"id":1}"#).is_none());
    }
}
