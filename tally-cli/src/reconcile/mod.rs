pub mod diff;
pub mod reconciler;
pub mod snapshot;

pub use diff::{ComponentDiscrepancy, ReconcileReport, SnapshotSide, StateDiffer, Verdict};
pub use reconciler::{ReconcileError, ReconcileStage, Reconciler};
pub use snapshot::fetch_snapshots;
