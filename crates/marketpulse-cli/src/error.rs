use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] marketpulse_core::ValidationError),

    #[error(transparent)]
    Registry(#[from] marketpulse_core::RegistryError),

    #[error(transparent)]
    Read(#[from] marketpulse_core::ReadError),

    #[error(transparent)]
    Warehouse(#[from] marketpulse_core::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Registry(_) | Self::Read(_) => 3,
            Self::Serialization(_) => 4,
            Self::Warehouse(_) | Self::Io(_) => 10,
        }
    }
}
