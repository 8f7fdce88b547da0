use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 15;

/// Upper-case ticker as the registry and cache key it.
///
/// Accepts 1 to 15 characters of `[A-Z0-9.-]` starting with a letter or
/// digit, which covers crypto tickers (`BTC`, `1INCH`) and share classes
/// (`BRK.B`). Provider
/// specific forms such as `BTCUSDT` or `bitcoin` are derived by adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let ticker = input.trim().to_ascii_uppercase();

        let Some(first) = ticker.chars().next() else {
            return Err(ValidationError::EmptySymbol);
        };
        let len = ticker.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }
        if !first.is_ascii_alphanumeric() {
            return Err(ValidationError::SymbolInvalidStart { ch: first });
        }
        if let Some((index, ch)) = ticker
            .chars()
            .enumerate()
            .find(|(_, ch)| !matches!(ch, 'A'..='Z' | '0'..='9' | '.' | '-'))
        {
            return Err(ValidationError::SymbolInvalidChar { ch, index });
        }

        Ok(Self(ticker))
    }

    /// Parses every entry, stopping at the first invalid one.
    pub fn parse_many<I, S>(inputs: I) -> Result<Vec<Self>, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        inputs
            .into_iter()
            .map(|raw| Self::parse(raw.as_ref()))
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

/// Comma-joined rendering used in cache keys and log fields.
pub fn join_symbols(symbols: &[Symbol]) -> String {
    symbols
        .iter()
        .map(Symbol::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_uppercases() {
        assert_eq!(Symbol::parse(" btc ").expect("valid").as_str(), "BTC");
    }

    #[test]
    fn non_ascii_letters_are_invalid_characters() {
        let err = Symbol::parse("BTCÜ").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidChar { index: 3, .. }));
    }

    #[test]
    fn join_keeps_request_order() {
        let symbols = Symbol::parse_many(["eth", "btc"]).expect("valid");
        assert_eq!(join_symbols(&symbols), "ETH,BTC");
    }

    #[test]
    fn accepts_share_class_suffix() {
        let parsed = Symbol::parse("brk.b").expect("symbol should parse");
        assert_eq!(parsed.as_str(), "BRK.B");
    }

    #[test]
    fn accepts_leading_digit() {
        assert_eq!(Symbol::parse("1inch").expect("valid").as_str(), "1INCH");
    }

    #[test]
    fn rejects_punctuation_at_start() {
        let err = Symbol::parse(".B").expect_err("must fail");
        assert_eq!(err, ValidationError::SymbolInvalidStart { ch: '.' });
        let err = Symbol::parse("-USD").expect_err("must fail");
        assert_eq!(err, ValidationError::SymbolInvalidStart { ch: '-' });
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = Symbol::parse("ETH/USD").expect_err("must fail");
        assert!(matches!(err, ValidationError::SymbolInvalidChar { .. }));
    }

    #[test]
    fn parse_many_stops_at_first_error() {
        let err = Symbol::parse_many(["BTC", "", "ETH"]).expect_err("must fail");
        assert_eq!(err, ValidationError::EmptySymbol);
    }
}
