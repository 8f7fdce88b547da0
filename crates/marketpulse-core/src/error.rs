use thiserror::Error;

use crate::Domain;

/// Rejected user or configuration input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty symbol")]
    EmptySymbol,
    #[error("symbol is {len} characters long, at most {max} are allowed")]
    SymbolTooLong { len: usize, max: usize },
    #[error("symbol starts with '{ch}' instead of a letter or digit")]
    SymbolInvalidStart { ch: char },
    #[error("unexpected '{ch}' at position {index} of symbol")]
    SymbolInvalidChar { ch: char, index: usize },

    #[error("invalid domain '{value}', expected one of crypto, stock")]
    InvalidDomain { value: String },
    #[error("invalid history range '{value}', expected one of 1d, 7d, 30d, 90d, 1y")]
    InvalidRange { value: String },

    #[error("timestamp is not RFC3339: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("invalid configuration value for {key}: '{value}'")]
    InvalidConfig { key: String, value: String },
}

/// Raised by the registry when a whole domain could not be served.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no eligible {domain} providers are configured")]
    NoEligibleProviders { domain: Domain },

    #[error("all {domain} providers exhausted ({attempted} attempted, {skipped} skipped)")]
    AllProvidersExhausted {
        domain: Domain,
        attempted: usize,
        skipped: usize,
    },
}

impl RegistryError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoEligibleProviders { .. } => "registry.no_eligible_providers",
            Self::AllProvidersExhausted { .. } => "registry.all_providers_exhausted",
        }
    }
}

/// Raised by the read path when neither cache nor store holds anything.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("no {domain} data available yet for {symbols}")]
    NoDataYet { domain: Domain, symbols: String },
}

/// Fallback store failures. The worker logs these and carries on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] marketpulse_warehouse::WarehouseError),

    #[error("stored row is invalid: {0}")]
    InvalidRow(String),

    #[error("store task failed: {0}")]
    Join(String),
}

/// Any failure a core caller can see.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_keeps_the_inner_message() {
        let error = CoreError::from(ValidationError::EmptySymbol);
        assert_eq!(error.to_string(), "empty symbol");

        let error = CoreError::from(RegistryError::AllProvidersExhausted {
            domain: Domain::Stock,
            attempted: 3,
            skipped: 1,
        });
        assert_eq!(
            error.to_string(),
            "all stock providers exhausted (3 attempted, 1 skipped)"
        );
    }
}
