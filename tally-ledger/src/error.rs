use tally_core::{Address, BalanceComponent};
use thiserror::Error;

/// Result alias for normalization and accounting.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error surfaced while turning operations into deltas or applying them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("operation {index}: unrecognized address shape {shape}")]
    MalformedAddress { index: usize, shape: String },
    #[error("operation {index}: storage {pallet}.{item} has no balance field")]
    MissingField {
        index: usize,
        pallet: String,
        item: String,
    },
    #[error("operation {index}: storage field `{field}` is not a tracked balance component")]
    UnknownField { index: usize, field: String },
    #[error("operation {index}: invalid amount {value}")]
    InvalidAmount { index: usize, value: String },
    #[error("operation {index}: no pre-block snapshot for {address} ({component})")]
    MissingAccount {
        index: usize,
        address: Address,
        component: BalanceComponent,
    },
}

impl LedgerError {
    /// Whether the error comes from a malformed operation record.
    pub fn is_malformed_operation(&self) -> bool {
        !matches!(self, LedgerError::MissingAccount { .. })
    }
}
