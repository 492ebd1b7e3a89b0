use thiserror::Error;

use crate::internal::scheduler::ledger::LedgerKey;
use crate::resources::ResourceAmount;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum SchedError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid snapshot: {0}")]
    SnapshotError(String),
    #[error(
        "Resource ledger invariant violated on {key:?}: booking {amount} exceeds capacity {capacity} (already used {used})"
    )]
    LedgerInvariant {
        key: LedgerKey,
        amount: ResourceAmount,
        used: ResourceAmount,
        capacity: ResourceAmount,
    },
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for SchedError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<String> for SchedError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for SchedError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
