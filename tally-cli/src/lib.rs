//! Balance reconciliation crawler: re-derives post-block balances from each
//! block's operations and compares them with what the node reports.

pub mod app;
pub mod crawl;
pub mod reconcile;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use app::run as run_app;
