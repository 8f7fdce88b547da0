//! Provider contract and the types that describe a provider.
//!
//! A provider knows how to reach one external API and how to split its
//! response into per-symbol raw objects for the [`normalizer`](crate::normalizer).
//! Circuit breaking, metrics and timeouts are applied uniformly by the
//! [`ProviderRegistry`](crate::registry::ProviderRegistry), never inside a
//! provider.
//!
//! | Method | Capability | Description |
//! |--------|------------|-------------|
//! | [`fetch_snapshot`](MarketDataProvider::fetch_snapshot) | `snapshot` | Current price and stats for a symbol set |
//! | [`fetch_history`](MarketDataProvider::fetch_history) | `history` | Price series for one symbol |
//! | [`connect`](MarketDataProvider::connect) | `live` | Push feed of normalized records |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Domain, HistoryRange, MarketRecord, ProviderId, SeriesPoint, Symbol};

/// Single capability a provider may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Live,
    Snapshot,
    History,
}

impl Capability {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Snapshot => "snapshot",
            Self::History => "history",
        }
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability matrix of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    pub live: bool,
    pub snapshot: bool,
    pub history: bool,
}

impl CapabilitySet {
    pub const fn new(live: bool, snapshot: bool, history: bool) -> Self {
        Self {
            live,
            snapshot,
            history,
        }
    }

    pub const fn snapshot_only() -> Self {
        Self::new(false, true, false)
    }

    pub const fn supports(self, capability: Capability) -> bool {
        match capability {
            Capability::Live => self.live,
            Capability::Snapshot => self.snapshot,
            Capability::History => self.history,
        }
    }

    pub fn supported(self) -> Vec<&'static str> {
        let mut values = Vec::with_capacity(3);
        if self.live {
            values.push("live");
        }
        if self.snapshot {
            values.push("snapshot");
        }
        if self.history {
            values.push("history");
        }
        values
    }
}

/// Static identity of one data source, fixed at process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub domain: Domain,
    /// Author-assigned rank; lower is preferred.
    pub static_priority: u32,
    pub capabilities: CapabilitySet,
    pub requires_key: bool,
    /// Informational only; nothing in the core enforces it.
    pub rate_limit_per_window: Option<u32>,
}

impl ProviderDescriptor {
    pub const fn new(
        id: ProviderId,
        domain: Domain,
        static_priority: u32,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            id,
            domain,
            static_priority,
            capabilities,
            requires_key: false,
            rate_limit_per_window: None,
        }
    }

    pub const fn with_key_required(mut self) -> Self {
        self.requires_key = true;
        self
    }

    pub const fn with_rate_limit(mut self, per_window: u32) -> Self {
        self.rate_limit_per_window = Some(per_window);
        self
    }
}

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    UnsupportedCapability,
    Unavailable,
    RateLimited,
    InvalidRequest,
    Parse,
    Timeout,
    CircuitOpen,
    Internal,
}

/// Structured error from one provider call.
///
/// Every kind except [`SourceErrorKind::CircuitOpen`] is a genuine call
/// failure; `CircuitOpen` is synthesised by a breaker that refused the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unsupported_capability(capability: Capability) -> Self {
        Self {
            kind: SourceErrorKind::UnsupportedCapability,
            message: format!("capability '{capability}' is not supported by this provider"),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Parse,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(provider: ProviderId, after_ms: u64) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: format!("{provider} did not answer within {after_ms}ms"),
            retryable: true,
        }
    }

    pub fn circuit_open(provider: ProviderId) -> Self {
        Self {
            kind: SourceErrorKind::CircuitOpen,
            message: format!("{provider} circuit breaker is open; call skipped"),
            retryable: true,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Internal,
            message: message.into(),
            retryable: false,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn is_circuit_open(&self) -> bool {
        matches!(self.kind, SourceErrorKind::CircuitOpen)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::UnsupportedCapability => "source.unsupported_capability",
            SourceErrorKind::Unavailable => "source.unavailable",
            SourceErrorKind::RateLimited => "source.rate_limited",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::Parse => "source.parse",
            SourceErrorKind::Timeout => "source.timeout",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Handle to an open push feed.
///
/// Records arrive already normalized. Dropping the handle closes the feed.
#[derive(Debug)]
pub struct LiveFeed {
    provider: ProviderId,
    receiver: mpsc::Receiver<MarketRecord>,
    task: JoinHandle<()>,
}

impl LiveFeed {
    pub fn new(
        provider: ProviderId,
        receiver: mpsc::Receiver<MarketRecord>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            provider,
            receiver,
            task,
        }
    }

    pub const fn provider(&self) -> ProviderId {
        self.provider
    }

    /// Next record, or `None` once the upstream connection has ended.
    pub async fn recv(&mut self) -> Option<MarketRecord> {
        self.receiver.recv().await
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Market data provider contract.
///
/// Implementations surface every HTTP non-2xx status, transport error, parse
/// error and provider error payload as `Err`. `Ok(vec![])` means the provider
/// answered but had nothing for these symbols.
pub trait MarketDataProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn id(&self) -> ProviderId {
        self.descriptor().id
    }

    /// Fetches a current snapshot for the requested symbols.
    fn fetch_snapshot<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, Vec<MarketRecord>>;

    /// Fetches a price series. Only meaningful for `history`-capable providers.
    fn fetch_history<'a>(
        &'a self,
        symbol: &'a Symbol,
        range: HistoryRange,
    ) -> ProviderFuture<'a, Vec<SeriesPoint>> {
        let _ = (symbol, range);
        Box::pin(async { Err(SourceError::unsupported_capability(Capability::History)) })
    }

    /// Opens a push feed. Only meaningful for `live`-capable providers.
    fn connect<'a>(&'a self, symbols: &'a [Symbol]) -> ProviderFuture<'a, LiveFeed> {
        let _ = symbols;
        Box::pin(async { Err(SourceError::unsupported_capability(Capability::Live)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_set_reports_supported_entries() {
        let caps = CapabilitySet::new(true, true, false);
        assert!(caps.supports(Capability::Live));
        assert!(!caps.supports(Capability::History));
        assert_eq!(caps.supported(), vec!["live", "snapshot"]);
    }

    #[test]
    fn circuit_open_is_distinguishable_from_call_failures() {
        let open = SourceError::circuit_open(ProviderId::YAHOO);
        let failed = SourceError::unavailable("yahoo returned status 503");

        assert!(open.is_circuit_open());
        assert!(!failed.is_circuit_open());
        assert_eq!(open.code(), "source.circuit_open");
        assert_eq!(
            SourceError::timeout(ProviderId::BINANCE, 10_000).kind(),
            SourceErrorKind::Timeout
        );
    }
}
