//! # Domain Models
//!
//! Canonical types shared by every provider, the registry, the cache and the
//! background worker.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`MarketRecord`] | Normalized snapshot record for one symbol |
//! | [`SeriesPoint`] | One historical price point |
//! | [`Domain`] | `crypto` or `stock` vertical |
//! | [`HistoryRange`] | Lookback window for history fetches |
//! | [`Symbol`] | Validated uppercase ticker |
//! | [`UtcDateTime`] | UTC timestamp, serialized as RFC3339 |

mod models;
mod symbol;
mod timestamp;

pub use models::{Domain, HistoryRange, MarketRecord, SeriesPoint};
pub use symbol::{join_symbols, Symbol};
pub use timestamp::UtcDateTime;
