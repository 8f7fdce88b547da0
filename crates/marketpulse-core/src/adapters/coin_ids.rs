//! Ticker to provider asset id mapping for crypto APIs that key by slug.

use crate::Symbol;

/// `(ticker, coingecko id, coincap id)`
const COIN_IDS: [(&str, &str, &str); 16] = [
    ("BTC", "bitcoin", "bitcoin"),
    ("ETH", "ethereum", "ethereum"),
    ("SOL", "solana", "solana"),
    ("BNB", "binancecoin", "binance-coin"),
    ("XRP", "ripple", "xrp"),
    ("ADA", "cardano", "cardano"),
    ("DOGE", "dogecoin", "dogecoin"),
    ("DOT", "polkadot", "polkadot"),
    ("AVAX", "avalanche-2", "avalanche"),
    ("MATIC", "matic-network", "polygon"),
    ("LTC", "litecoin", "litecoin"),
    ("LINK", "chainlink", "chainlink"),
    ("TRX", "tron", "tron"),
    ("SHIB", "shiba-inu", "shiba-inu"),
    ("USDT", "tether", "tether"),
    ("USDC", "usd-coin", "usd-coin"),
];

fn lookup(symbol: &Symbol) -> Option<&'static (&'static str, &'static str, &'static str)> {
    COIN_IDS.iter().find(|(ticker, _, _)| *ticker == symbol.as_str())
}

/// CoinGecko id for a ticker, falling back to the lowercase ticker.
pub fn coingecko_id(symbol: &Symbol) -> String {
    lookup(symbol)
        .map(|(_, id, _)| (*id).to_owned())
        .unwrap_or_else(|| symbol.as_str().to_ascii_lowercase())
}

/// CoinCap id for a ticker, falling back to the lowercase ticker.
pub fn coincap_id(symbol: &Symbol) -> String {
    lookup(symbol)
        .map(|(_, _, id)| (*id).to_owned())
        .unwrap_or_else(|| symbol.as_str().to_ascii_lowercase())
}

/// Binance spot pair quoted in USDT.
pub fn binance_pair(symbol: &Symbol) -> String {
    format!("{}USDT", symbol.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_tickers() {
        let bnb = Symbol::parse("bnb").expect("valid");
        assert_eq!(coingecko_id(&bnb), "binancecoin");
        assert_eq!(coincap_id(&bnb), "binance-coin");

        let pepe = Symbol::parse("PEPE").expect("valid");
        assert_eq!(coingecko_id(&pepe), "pepe");
        assert_eq!(binance_pair(&pepe), "PEPEUSDT");
    }
}
