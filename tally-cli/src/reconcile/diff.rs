use std::fmt;

use tally_core::{AccountSnapshot, Address, Amount, BalanceComponent, BlockHeight, Snapshots};

/// Outcome of reconciling one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileReport {
    pub height: BlockHeight,
    /// Distinct accounts touched by the block.
    pub accounts: usize,
    /// Deltas applied to the pre-block snapshots.
    pub deltas: usize,
    pub verdict: Verdict,
}

impl ReconcileReport {
    /// Every tracked account matches the node's post-block balances.
    pub fn is_ok(&self) -> bool {
        matches!(self.verdict, Verdict::Balanced)
    }

    /// First offending account, if any.
    pub fn address(&self) -> Option<&Address> {
        match &self.verdict {
            Verdict::Balanced => None,
            Verdict::Mismatch { address, .. } | Verdict::MissingSnapshot { address, .. } => {
                Some(address)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Balanced,
    Mismatch {
        address: Address,
        discrepancies: Vec<ComponentDiscrepancy>,
    },
    MissingSnapshot {
        address: Address,
        side: SnapshotSide,
    },
}

/// Which fetch lacked the account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotSide {
    PreBlock,
    PostBlock,
}

impl fmt::Display for SnapshotSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SnapshotSide::PreBlock => "pre-block",
            SnapshotSide::PostBlock => "post-block",
        })
    }
}

/// Detail for a single component mismatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentDiscrepancy {
    pub component: BalanceComponent,
    pub computed: Amount,
    pub reported: Amount,
    /// `computed - reported`.
    pub delta: Amount,
}

/// Stateless engine that compares computed and reported snapshots.
pub struct StateDiffer;

impl StateDiffer {
    /// Walk `addresses` in order and stop at the first account that is
    /// missing on either side or differs in any tracked component.
    pub fn compare(addresses: &[Address], computed: &Snapshots, reported: &Snapshots) -> Verdict {
        for address in addresses {
            let Some(ours) = computed.get(address) else {
                return Verdict::MissingSnapshot {
                    address: address.clone(),
                    side: SnapshotSide::PreBlock,
                };
            };
            let Some(theirs) = reported.get(address) else {
                return Verdict::MissingSnapshot {
                    address: address.clone(),
                    side: SnapshotSide::PostBlock,
                };
            };
            let discrepancies = Self::diff_account(ours, theirs);
            if !discrepancies.is_empty() {
                return Verdict::Mismatch {
                    address: address.clone(),
                    discrepancies,
                };
            }
        }
        Verdict::Balanced
    }

    /// Exact comparison of the four tracked components.
    pub fn diff_account(
        computed: &AccountSnapshot,
        reported: &AccountSnapshot,
    ) -> Vec<ComponentDiscrepancy> {
        BalanceComponent::ALL
            .into_iter()
            .filter_map(|component| {
                let ours = computed.component(component);
                let theirs = reported.component(component);
                (ours != theirs).then(|| ComponentDiscrepancy {
                    component,
                    computed: ours.clone(),
                    reported: theirs.clone(),
                    delta: ours - theirs,
                })
            })
            .collect()
    }
}
