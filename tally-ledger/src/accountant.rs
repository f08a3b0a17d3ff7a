use tally_core::{Delta, MissingAccountPolicy, Snapshots};
use tracing::{trace, warn};

use crate::error::{LedgerError, LedgerResult};

/// Applies a block's deltas to the snapshots taken before it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LedgerAccountant {
    policy: MissingAccountPolicy,
}

impl LedgerAccountant {
    pub fn new(policy: MissingAccountPolicy) -> Self {
        Self { policy }
    }

    /// Return the computed post-block snapshots; `pre` is left untouched.
    ///
    /// Every delta is summed into its account's component in source order.
    /// A delta for an account absent from `pre` is dropped with a warning
    /// under [`MissingAccountPolicy::Skip`] and fails the block under
    /// [`MissingAccountPolicy::Reject`].
    pub fn apply(&self, pre: &Snapshots, deltas: &[Delta]) -> LedgerResult<Snapshots> {
        let mut computed = pre.clone();
        for delta in deltas {
            let Some(snapshot) = computed.get_mut(&delta.address) else {
                match self.policy {
                    MissingAccountPolicy::Skip => {
                        warn!(
                            index = delta.index,
                            address = %delta.address,
                            component = %delta.component,
                            amount = %delta.amount,
                            "dropping delta for account without pre-block snapshot"
                        );
                        continue;
                    }
                    MissingAccountPolicy::Reject => {
                        return Err(LedgerError::MissingAccount {
                            index: delta.index,
                            address: delta.address.clone(),
                            component: delta.component,
                        });
                    }
                }
            };
            trace!(
                index = delta.index,
                address = %delta.address,
                component = %delta.component,
                amount = %delta.amount,
                "applying delta"
            );
            *snapshot.component_mut(delta.component) += &delta.amount;
        }
        Ok(computed)
    }
}
