//! Failure taxonomy shared by the lifecycle manager, the verifier and the
//! subscription service. Transport status codes are assigned in `api::errors`.

use crate::chain::ChainError;
use crate::pinning::PinError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Listing is locked: {0}")]
    Locked(String),

    #[error("Pinning failed: {0}")]
    PinFailure(String),

    #[error("Transaction receipt not found: {0}")]
    ReceiptNotFound(String),

    #[error("Insufficient confirmations: {have} (minimum required: {need})")]
    InsufficientConfirmations { have: u64, need: u64 },

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("No registry log found in transaction {0}")]
    IdNotFoundInLogs(String),

    #[error("Listing {0} is not active on-chain")]
    ListingNotActiveOnchain(u64),

    #[error("Chain access error: {0}")]
    ChainAccess(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    /// Stable machine-readable kind carried in every failure response.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Validation(_) => "validation",
            MarketError::Locked(_) => "locked",
            MarketError::PinFailure(_) => "pin-failure",
            MarketError::ReceiptNotFound(_) => "receipt-not-found",
            MarketError::InsufficientConfirmations { .. } => "insufficient-confirmations",
            MarketError::TransactionReverted(_) => "transaction-reverted",
            MarketError::IdNotFoundInLogs(_) => "id-not-found-in-logs",
            MarketError::ListingNotActiveOnchain(_) => "listing-not-active-onchain",
            MarketError::ChainAccess(_) => "chain-access-error",
            MarketError::NotFound(_) => "not-found",
            MarketError::Forbidden(_) => "forbidden",
            MarketError::Internal(_) => "internal",
        }
    }

    /// Whether re-invoking the same operation later can succeed without the
    /// caller changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketError::PinFailure(_)
                | MarketError::ReceiptNotFound(_)
                | MarketError::InsufficientConfirmations { .. }
                | MarketError::ChainAccess(_)
        )
    }
}

impl From<StorageError> for MarketError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => MarketError::NotFound(key),
            StorageError::Duplicate(key) => {
                MarketError::Validation(format!("duplicate record: {}", key))
            }
            other => MarketError::Internal(other.to_string()),
        }
    }
}

impl From<ChainError> for MarketError {
    fn from(err: ChainError) -> Self {
        MarketError::ChainAccess(err.to_string())
    }
}

impl From<PinError> for MarketError {
    fn from(err: PinError) -> Self {
        MarketError::PinFailure(err.message)
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_split() {
        assert!(MarketError::InsufficientConfirmations { have: 0, need: 1 }.is_retryable());
        assert!(MarketError::ReceiptNotFound("0xab".into()).is_retryable());
        assert!(MarketError::ChainAccess("timeout".into()).is_retryable());
        assert!(MarketError::PinFailure("502".into()).is_retryable());

        assert!(!MarketError::TransactionReverted("0xab".into()).is_retryable());
        assert!(!MarketError::IdNotFoundInLogs("0xab".into()).is_retryable());
        assert!(!MarketError::ListingNotActiveOnchain(7).is_retryable());
        assert!(!MarketError::Locked("pinned".into()).is_retryable());
        assert!(!MarketError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_storage_conversion() {
        let err: MarketError = StorageError::NotFound("listing 4".into()).into();
        assert_eq!(err.kind(), "not-found");

        let err: MarketError = StorageError::Duplicate("0xabc".into()).into();
        assert_eq!(err.kind(), "validation");

        let err: MarketError = StorageError::Backend("disk full".into()).into();
        assert_eq!(err.kind(), "internal");
    }
}
