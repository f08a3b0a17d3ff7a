//! Turns sidecar operations into balance deltas and applies them to snapshots.

mod accountant;
mod error;
mod normalize;

pub use accountant::LedgerAccountant;
pub use error::{LedgerError, LedgerResult};
pub use normalize::{normalize_operations, touched_addresses};
