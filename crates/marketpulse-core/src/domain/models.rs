use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{UtcDateTime, ValidationError};

/// One of the two independent data verticals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Crypto,
    Stock,
}

impl Domain {
    pub const ALL: [Self; 2] = [Self::Crypto, Self::Stock];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Stock => "stock",
        }
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "crypto" => Ok(Self::Crypto),
            "stock" | "stocks" => Ok(Self::Stock),
            other => Err(ValidationError::InvalidDomain {
                value: other.to_owned(),
            }),
        }
    }
}

/// Canonical market snapshot record produced by the normalizer.
///
/// `symbol` and `price` are always present; the remaining numeric fields are
/// best-effort and omitted from JSON when the provider did not supply them.
/// `timestamp` is the normalization instant, not the provider's own clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRecord {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<f64>,
    pub timestamp: UtcDateTime,
    pub source: String,
    pub kind: Domain,
}

impl MarketRecord {
    /// Whether the record carries a usable price.
    ///
    /// The normalizer is total and reports a missing price as `0.0`; adapters
    /// drop such records before they leave the provider.
    pub fn has_price(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

/// One point of a provider's historical price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: UtcDateTime,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

/// Lookback window accepted by history fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryRange {
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
    #[serde(rename = "1y")]
    OneYear,
}

impl HistoryRange {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
            Self::NinetyDays => "90d",
            Self::OneYear => "1y",
        }
    }

    pub const fn days(self) -> u32 {
        match self {
            Self::OneDay => 1,
            Self::SevenDays => 7,
            Self::ThirtyDays => 30,
            Self::NinetyDays => 90,
            Self::OneYear => 365,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::days(i64::from(self.days()))
    }
}

impl Display for HistoryRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryRange {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1d" => Ok(Self::OneDay),
            "7d" | "1w" => Ok(Self::SevenDays),
            "30d" | "1m" => Ok(Self::ThirtyDays),
            "90d" | "3m" => Ok(Self::NinetyDays),
            "1y" | "365d" => Ok(Self::OneYear),
            other => Err(ValidationError::InvalidRange {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_numeric_price_and_iso_timestamp() {
        let record = MarketRecord {
            symbol: String::from("BTC"),
            name: String::from("Bitcoin"),
            price: 65_000.0,
            change_24h: Some(1.5),
            volume: None,
            market_cap: Some(1.2e12),
            timestamp: UtcDateTime::parse("2024-01-01T00:00:00Z").expect("valid"),
            source: String::from("coingecko"),
            kind: Domain::Crypto,
        };

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["price"], serde_json::json!(65_000.0));
        assert_eq!(json["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(json["change24h"], serde_json::json!(1.5));
        assert_eq!(json["marketCap"], serde_json::json!(1.2e12));
        assert_eq!(json["kind"], "crypto");
        assert!(json.get("volume").is_none());
    }

    #[test]
    fn parses_domain_and_range() {
        assert_eq!("Crypto".parse::<Domain>(), Ok(Domain::Crypto));
        assert_eq!("stocks".parse::<Domain>(), Ok(Domain::Stock));
        assert!("forex".parse::<Domain>().is_err());

        assert_eq!("7d".parse::<HistoryRange>(), Ok(HistoryRange::SevenDays));
        assert_eq!(HistoryRange::OneYear.days(), 365);
        assert!("2w".parse::<HistoryRange>().is_err());
    }
}
