use std::fmt;
use std::sync::Arc;

use tally_core::BlockHeight;
use tally_ledger::{normalize_operations, touched_addresses, LedgerAccountant, LedgerError};
use tally_sidecar::{BlockOperations, SidecarApi, SidecarError};
use thiserror::Error;
use tracing::{debug, instrument};

use super::diff::{ReconcileReport, StateDiffer};
use super::snapshot::fetch_snapshots;

/// Step of a block reconciliation, attached to sidecar failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileStage {
    FetchingHead,
    FetchingBlock,
    FetchingPre,
    FetchingPost,
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReconcileStage::FetchingHead => "fetching chain head",
            ReconcileStage::FetchingBlock => "fetching block operations",
            ReconcileStage::FetchingPre => "fetching pre-block balances",
            ReconcileStage::FetchingPost => "fetching post-block balances",
        })
    }
}

/// Failure that prevented a block from being reconciled at all.
///
/// Balance disagreements are not errors; they are reported through
/// [`ReconcileReport::verdict`].
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid block height `{0}`")]
    InvalidHeight(String),
    #[error("block {0} has no parent block to reconcile against")]
    NoParentBlock(BlockHeight),
    #[error("requested block {requested} but the sidecar returned block {received}")]
    UnexpectedBlock {
        requested: BlockHeight,
        received: BlockHeight,
    },
    #[error("sidecar failure while {stage}: {source}")]
    Sidecar {
        stage: ReconcileStage,
        #[source]
        source: SidecarError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ReconcileError {
    fn sidecar(stage: ReconcileStage) -> impl FnOnce(SidecarError) -> Self {
        move |source| ReconcileError::Sidecar { stage, source }
    }
}

/// Re-derives one block's post-state from its parent and checks it against the node.
pub struct Reconciler {
    api: Arc<dyn SidecarApi>,
    accountant: LedgerAccountant,
}

impl Reconciler {
    pub fn new(api: Arc<dyn SidecarApi>, accountant: LedgerAccountant) -> Self {
        Self { api, accountant }
    }

    /// Height of the latest block the sidecar knows about.
    pub async fn chain_head(&self) -> Result<BlockHeight, ReconcileError> {
        let head = self
            .api
            .block_operations(None)
            .await
            .map_err(ReconcileError::sidecar(ReconcileStage::FetchingHead))?;
        block_height(&head)
    }

    /// Fetch the operations of `height` and reconcile them.
    pub async fn reconcile_height(
        &self,
        height: BlockHeight,
    ) -> Result<ReconcileReport, ReconcileError> {
        if height.previous().is_none() {
            return Err(ReconcileError::NoParentBlock(height));
        }
        let block = self
            .api
            .block_operations(Some(height))
            .await
            .map_err(ReconcileError::sidecar(ReconcileStage::FetchingBlock))?;
        let received = block_height(&block)?;
        if received != height {
            return Err(ReconcileError::UnexpectedBlock {
                requested: height,
                received,
            });
        }
        self.reconcile(&block).await
    }

    /// Reconcile an already fetched block.
    ///
    /// Pre-block balances are fetched at `height - 1`, the block's deltas are
    /// applied to them, and the result is compared with the balances the node
    /// reports at `height`.
    #[instrument(skip_all, fields(height = %block.at.height))]
    pub async fn reconcile(&self, block: &BlockOperations) -> Result<ReconcileReport, ReconcileError> {
        let height = block_height(block)?;
        let parent = height
            .previous()
            .ok_or(ReconcileError::NoParentBlock(height))?;
        let addresses = touched_addresses(&block.operations)?;
        let deltas = normalize_operations(&block.operations)?;
        debug!(
            accounts = addresses.len(),
            deltas = deltas.len(),
            "normalized block operations"
        );

        let pre = fetch_snapshots(self.api.as_ref(), &addresses, parent)
            .await
            .map_err(ReconcileError::sidecar(ReconcileStage::FetchingPre))?;
        let computed = self.accountant.apply(&pre, &deltas)?;
        let reported = fetch_snapshots(self.api.as_ref(), &addresses, height)
            .await
            .map_err(ReconcileError::sidecar(ReconcileStage::FetchingPost))?;

        let verdict = StateDiffer::compare(&addresses, &computed, &reported);
        Ok(ReconcileReport {
            height,
            accounts: addresses.len(),
            deltas: deltas.len(),
            verdict,
        })
    }
}

fn block_height(block: &BlockOperations) -> Result<BlockHeight, ReconcileError> {
    block
        .at
        .height
        .parse()
        .map_err(|_| ReconcileError::InvalidHeight(block.at.height.clone()))
}
