//! CLI argument definitions for marketpulse.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Run the refresh worker and print each update as NDJSON |
//! | `snapshot` | One registry snapshot fetch |
//! | `history` | One registry history fetch |
//! | `sources` | Provider descriptors, key presence and breaker state |
//! | `read` | Latest stored snapshot from the warehouse |
//!
//! Provider keys and tuning come from `MARKETPULSE_*` environment variables.
//!
//! # Examples
//!
//! ```bash
//! marketpulse snapshot crypto BTC ETH --pretty
//! marketpulse history stock AAPL --range 30d
//! RUST_LOG=marketpulse_core=debug marketpulse run --crypto BTC --stock MSFT
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use marketpulse_core::Domain;

/// Multi-provider market data aggregator.
#[derive(Debug, Parser)]
#[command(
    name = "marketpulse",
    author,
    version,
    about = "Multi-provider crypto and stock market data aggregator"
)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    /// Pretty-print JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the background refresh worker until Ctrl-C.
    Run(RunArgs),
    /// Fetch a current snapshot through the provider registry.
    Snapshot(SymbolsArgs),
    /// Fetch a historical price series.
    History(HistoryArgs),
    /// List providers for a domain with their live status.
    Sources(SourcesArgs),
    /// Read the latest stored snapshot without contacting providers.
    Read(SymbolsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Crypto symbols to track; defaults to the configured list.
    #[arg(long, num_args = 1..)]
    pub crypto: Vec<String>,

    /// Stock symbols to track; defaults to the configured list.
    #[arg(long, num_args = 1..)]
    pub stock: Vec<String>,

    /// Keep fallback snapshots in memory instead of the warehouse.
    #[arg(long, default_value_t = false)]
    pub memory_store: bool,
}

#[derive(Debug, Args)]
pub struct SymbolsArgs {
    #[arg(value_enum)]
    pub domain: DomainArg,

    #[arg(required = true)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(value_enum)]
    pub domain: DomainArg,

    pub symbol: String,

    /// Lookback window: 1d, 7d, 30d, 90d or 1y.
    #[arg(long, default_value = "7d")]
    pub range: String,
}

#[derive(Debug, Args)]
pub struct SourcesArgs {
    #[arg(value_enum)]
    pub domain: DomainArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DomainArg {
    Crypto,
    Stock,
}

impl From<DomainArg> for Domain {
    fn from(value: DomainArg) -> Self {
        match value {
            DomainArg::Crypto => Domain::Crypto,
            DomainArg::Stock => Domain::Stock,
        }
    }
}
