//! Raw provider payload to [`MarketRecord`] mapping.
//!
//! [`normalize`] is total: any JSON value yields a record. Missing optional
//! fields stay `None`, a missing symbol becomes `"UNKNOWN"` and a missing
//! price becomes `0.0` (see [`MarketRecord::has_price`]). Numbers may arrive
//! as JSON numbers or numeric strings, depending on the provider.
//!
//! | Source | Symbol | Price | Change 24h (%) | Volume (USD) |
//! |--------|--------|-------|----------------|--------------|
//! | `coingecko` | `symbol` | `current_price` | `price_change_percentage_24h` | `total_volume` |
//! | `coincap` | `symbol` | `priceUsd` | `changePercent24Hr` | `volumeUsd24Hr` |
//! | `binance` | `symbol` minus quote asset | `lastPrice` / `c` | `priceChangePercent` / `P` | `quoteVolume` / `q` |
//! | `cryptocompare` | `FROMSYMBOL` | `PRICE` | `CHANGEPCT24HOUR` | `VOLUME24HOURTO` |
//! | `yahoo` | `symbol` | `regularMarketPrice` | `regularMarketChangePercent` | volume x price |
//! | `finnhub` | `symbol` | `c` | `dp` | n/a |
//! | `polygon` | `ticker` | `day.c` / `lastTrade.p` / `prevDay.c` | `todaysChangePerc` | volume x price |
//! | `alphavantage` | `01. symbol` | `05. price` | `10. change percent` | volume x price |

use serde_json::Value;

use crate::{Domain, MarketRecord, UtcDateTime};

pub const UNKNOWN_SYMBOL: &str = "UNKNOWN";

const BINANCE_QUOTE_ASSETS: [&str; 4] = ["USDT", "BUSD", "USDC", "USD"];

/// Maps one raw provider object to a canonical record stamped with the
/// current instant.
pub fn normalize(raw: &Value, source: &str, kind: Domain) -> MarketRecord {
    normalize_at(raw, source, kind, UtcDateTime::now())
}

/// [`normalize`] with an explicit timestamp.
pub fn normalize_at(raw: &Value, source: &str, kind: Domain, timestamp: UtcDateTime) -> MarketRecord {
    let fields = match source.trim().to_ascii_lowercase().as_str() {
        "coingecko" => coingecko(raw),
        "coincap" => coincap(raw),
        "binance" => binance(raw),
        "cryptocompare" => cryptocompare(raw),
        "yahoo" => yahoo(raw),
        "finnhub" => finnhub(raw),
        "polygon" => polygon(raw),
        "alphavantage" => alphavantage(raw),
        _ => generic(raw),
    };

    let symbol = fields
        .symbol
        .map(|value| value.trim().to_ascii_uppercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| String::from(UNKNOWN_SYMBOL));
    let name = fields
        .name
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| symbol.clone());

    MarketRecord {
        symbol,
        name,
        price: fields.price.unwrap_or(0.0),
        change_24h: fields.change_24h,
        volume: fields.volume,
        market_cap: fields.market_cap,
        timestamp,
        source: source.to_owned(),
        kind,
    }
}

#[derive(Debug, Default)]
struct RawFields {
    symbol: Option<String>,
    name: Option<String>,
    price: Option<f64>,
    change_24h: Option<f64>,
    volume: Option<f64>,
    market_cap: Option<f64>,
}

fn coingecko(raw: &Value) -> RawFields {
    RawFields {
        symbol: text(raw, "symbol"),
        name: text(raw, "name"),
        price: number(raw, "current_price"),
        change_24h: number(raw, "price_change_percentage_24h"),
        volume: number(raw, "total_volume"),
        market_cap: number(raw, "market_cap"),
    }
}

fn coincap(raw: &Value) -> RawFields {
    RawFields {
        symbol: text(raw, "symbol"),
        name: text(raw, "name"),
        price: number(raw, "priceUsd"),
        change_24h: number(raw, "changePercent24Hr"),
        volume: number(raw, "volumeUsd24Hr"),
        market_cap: number(raw, "marketCapUsd"),
    }
}

// Covers both the REST 24hr ticker and the WebSocket mini-ticker payloads.
fn binance(raw: &Value) -> RawFields {
    let pair = text(raw, "symbol").or_else(|| text(raw, "s"));
    let price = number(raw, "lastPrice").or_else(|| number(raw, "c"));
    let open = number(raw, "openPrice").or_else(|| number(raw, "o"));
    let change_24h = number(raw, "priceChangePercent")
        .or_else(|| number(raw, "P"))
        .or_else(|| match (price, open) {
            (Some(last), Some(open)) if open > 0.0 => Some((last - open) / open * 100.0),
            _ => None,
        });

    RawFields {
        symbol: pair.map(|pair| strip_quote_asset(&pair)),
        name: None,
        price,
        change_24h,
        volume: number(raw, "quoteVolume").or_else(|| number(raw, "q")),
        market_cap: None,
    }
}

fn strip_quote_asset(pair: &str) -> String {
    let upper = pair.trim().to_ascii_uppercase();
    BINANCE_QUOTE_ASSETS
        .iter()
        .find_map(|quote| {
            upper
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(str::to_owned)
        })
        .unwrap_or(upper)
}

fn cryptocompare(raw: &Value) -> RawFields {
    RawFields {
        symbol: text(raw, "FROMSYMBOL"),
        name: None,
        price: number(raw, "PRICE"),
        change_24h: number(raw, "CHANGEPCT24HOUR"),
        volume: number(raw, "VOLUME24HOURTO"),
        market_cap: number(raw, "MKTCAP"),
    }
}

fn yahoo(raw: &Value) -> RawFields {
    let price = number(raw, "regularMarketPrice");
    RawFields {
        symbol: text(raw, "symbol"),
        name: text(raw, "shortName").or_else(|| text(raw, "longName")),
        price,
        change_24h: number(raw, "regularMarketChangePercent"),
        volume: notional(number(raw, "regularMarketVolume"), price),
        market_cap: number(raw, "marketCap"),
    }
}

fn finnhub(raw: &Value) -> RawFields {
    RawFields {
        symbol: text(raw, "symbol"),
        name: None,
        price: number(raw, "c"),
        change_24h: number(raw, "dp"),
        volume: None,
        market_cap: None,
    }
}

fn polygon(raw: &Value) -> RawFields {
    let price = nested_number(raw, "day", "c")
        .filter(|value| *value > 0.0)
        .or_else(|| nested_number(raw, "lastTrade", "p"))
        .or_else(|| nested_number(raw, "prevDay", "c"));
    RawFields {
        symbol: text(raw, "ticker"),
        name: None,
        price,
        change_24h: number(raw, "todaysChangePerc"),
        volume: notional(nested_number(raw, "day", "v"), price),
        market_cap: None,
    }
}

fn alphavantage(raw: &Value) -> RawFields {
    let price = number(raw, "05. price");
    RawFields {
        symbol: text(raw, "01. symbol"),
        name: None,
        price,
        change_24h: number(raw, "10. change percent"),
        volume: notional(number(raw, "06. volume"), price),
        market_cap: None,
    }
}

fn generic(raw: &Value) -> RawFields {
    RawFields {
        symbol: first_text(raw, &["symbol", "ticker", "s"]),
        name: first_text(raw, &["name", "shortName", "displayName"]),
        price: first_number(raw, &["price", "last", "close", "lastPrice", "c"]),
        change_24h: first_number(
            raw,
            &["change24h", "changePercent", "change_percent", "percentChange"],
        ),
        volume: first_number(raw, &["volume", "volume24h", "v"]),
        market_cap: first_number(raw, &["marketCap", "market_cap"]),
    }
}

fn notional(volume: Option<f64>, price: Option<f64>) -> Option<f64> {
    match (volume, price) {
        (Some(volume), Some(price)) => Some(volume * price),
        _ => None,
    }
}

fn text(raw: &Value, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.clone()),
        _ => None,
    }
}

fn first_text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| text(raw, key))
}

/// Reads a finite number stored either as a JSON number or a numeric string.
/// A trailing `%` is accepted for percent strings.
fn number(raw: &Value, key: &str) -> Option<f64> {
    as_number(raw.get(key)?)
}

fn nested_number(raw: &Value, outer: &str, key: &str) -> Option<f64> {
    number(raw.get(outer)?, key)
}

fn first_number(raw: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| number(raw, key))
}

pub(crate) fn as_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
