//! Client for the ledger sidecar REST service.
//!
//! Two endpoints are consumed:
//! - `GET /blocks/{height}?operations=true` for the balance operations of a block;
//! - `GET /accounts/{address}/balance-info?at={height}` for an account's balances.

mod client;
mod error;
mod types;

pub use client::{LinearBackoff, RetryPolicy, SidecarApi, SidecarClient, SidecarConfig};
pub use error::{SidecarError, SidecarResult};
pub use reqwest::StatusCode;
pub use types::{
    AtBlock, BalanceInfo, BalanceLock, BlockOperations, CurrencyId, Operation, OperationAddress,
    OperationAmount, StorageResourceId,
};
