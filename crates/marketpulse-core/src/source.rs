use std::fmt::{Display, Formatter};

use serde::{Serialize, Serializer};

/// Stable identifier of one external data source.
///
/// Ids are static strings so descriptors, breakers and metrics can key on a
/// `Copy` value. Built-in providers use the associated constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderId(&'static str);

impl ProviderId {
    pub const COINGECKO: Self = Self("coingecko");
    pub const COINCAP: Self = Self("coincap");
    pub const BINANCE: Self = Self("binance");
    pub const CRYPTOCOMPARE: Self = Self("cryptocompare");
    pub const YAHOO: Self = Self("yahoo");
    pub const FINNHUB: Self = Self("finnhub");
    pub const POLYGON: Self = Self("polygon");
    pub const ALPHAVANTAGE: Self = Self("alphavantage");

    pub const BUILT_IN: [Self; 8] = [
        Self::COINGECKO,
        Self::COINCAP,
        Self::BINANCE,
        Self::CRYPTOCOMPARE,
        Self::YAHOO,
        Self::FINNHUB,
        Self::POLYGON,
        Self::ALPHAVANTAGE,
    ];

    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }

    /// Look up a built-in provider by name, case-insensitively.
    pub fn built_in(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::BUILT_IN
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(name))
    }

    /// Upper-case token used in environment variable names.
    pub fn env_token(self) -> String {
        self.0.to_ascii_uppercase().replace('-', "_")
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProviderId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_built_in_ids() {
        assert_eq!(ProviderId::built_in("Yahoo"), Some(ProviderId::YAHOO));
        assert_eq!(ProviderId::built_in("unknown"), None);
        assert_eq!(ProviderId::ALPHAVANTAGE.env_token(), "ALPHAVANTAGE");
    }
}
