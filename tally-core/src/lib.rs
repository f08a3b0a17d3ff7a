//! Core domain types shared by every Tally crate.

mod amount;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use amount::{Amount, AmountParseError};

/// Height of a block on the audited chain.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockHeight(u64);

impl BlockHeight {
    pub const GENESIS: BlockHeight = BlockHeight(0);

    pub const fn new(height: u64) -> Self {
        Self(height)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Height of the parent block, `None` for genesis.
    pub fn previous(self) -> Option<BlockHeight> {
        self.0.checked_sub(1).map(BlockHeight)
    }

    pub fn next(self) -> Option<BlockHeight> {
        self.0.checked_add(1).map(BlockHeight)
    }
}

impl From<u64> for BlockHeight {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when a height string is not a non-negative integer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid block height `{0}`")]
pub struct HeightParseError(pub String);

impl FromStr for BlockHeight {
    type Err = HeightParseError;

    /// Accepts plain base-10 digits only: no sign, no surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(HeightParseError(s.to_string()));
        }
        s.parse::<u64>()
            .map(BlockHeight)
            .map_err(|_| HeightParseError(s.to_string()))
    }
}

/// Opaque account identifier, always held in its plain string form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four balance fields tracked per account. Any other field is invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BalanceComponent {
    Free,
    Reserved,
    MiscFrozen,
    FeeFrozen,
}

impl BalanceComponent {
    pub const ALL: [BalanceComponent; 4] = [
        BalanceComponent::Free,
        BalanceComponent::Reserved,
        BalanceComponent::MiscFrozen,
        BalanceComponent::FeeFrozen,
    ];

    /// Storage field name as the ledger service spells it.
    pub fn as_str(self) -> &'static str {
        match self {
            BalanceComponent::Free => "free",
            BalanceComponent::Reserved => "reserved",
            BalanceComponent::MiscFrozen => "miscFrozen",
            BalanceComponent::FeeFrozen => "feeFrozen",
        }
    }
}

impl fmt::Display for BalanceComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a storage field outside the tracked set.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown balance component `{0}`")]
pub struct UnknownComponent(pub String);

impl FromStr for BalanceComponent {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BalanceComponent::ALL
            .into_iter()
            .find(|component| component.as_str() == s)
            .ok_or_else(|| UnknownComponent(s.to_string()))
    }
}

/// Tracked balances of one account at one block height.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub address: Address,
    pub token_symbol: String,
    pub free: Amount,
    pub reserved: Amount,
    pub misc_frozen: Amount,
    pub fee_frozen: Amount,
}

impl AccountSnapshot {
    /// Snapshot with every component set to zero.
    pub fn empty(address: Address, token_symbol: impl Into<String>) -> Self {
        Self {
            address,
            token_symbol: token_symbol.into(),
            free: Amount::zero(),
            reserved: Amount::zero(),
            misc_frozen: Amount::zero(),
            fee_frozen: Amount::zero(),
        }
    }

    pub fn component(&self, component: BalanceComponent) -> &Amount {
        match component {
            BalanceComponent::Free => &self.free,
            BalanceComponent::Reserved => &self.reserved,
            BalanceComponent::MiscFrozen => &self.misc_frozen,
            BalanceComponent::FeeFrozen => &self.fee_frozen,
        }
    }

    pub fn component_mut(&mut self, component: BalanceComponent) -> &mut Amount {
        match component {
            BalanceComponent::Free => &mut self.free,
            BalanceComponent::Reserved => &mut self.reserved,
            BalanceComponent::MiscFrozen => &mut self.misc_frozen,
            BalanceComponent::FeeFrozen => &mut self.fee_frozen,
        }
    }

    /// Builder-style setter used by fixtures.
    pub fn with_component(mut self, component: BalanceComponent, amount: impl Into<Amount>) -> Self {
        *self.component_mut(component) = amount.into();
        self
    }
}

/// Snapshots for every account touched by a block, keyed by address.
pub type Snapshots = HashMap<Address, AccountSnapshot>;

/// Canonical balance change: add `amount` to `component` of `address`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    /// Position of the source operation within the block, kept for audit logs.
    pub index: usize,
    pub address: Address,
    pub component: BalanceComponent,
    pub amount: Amount,
}

impl Delta {
    pub fn new(
        index: usize,
        address: Address,
        component: BalanceComponent,
        amount: impl Into<Amount>,
    ) -> Self {
        Self {
            index,
            address,
            component,
            amount: amount.into(),
        }
    }
}

/// What accounting does with a delta whose account has no pre-block snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingAccountPolicy {
    /// Warn and drop the delta; the comparator still flags the account.
    #[default]
    Skip,
    /// Fail the whole block.
    Reject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_has_no_parent() {
        assert_eq!(BlockHeight::GENESIS.previous(), None);
        assert_eq!(BlockHeight::new(10).previous(), Some(BlockHeight::new(9)));
    }

    #[test]
    fn parses_heights() {
        assert_eq!("42".parse::<BlockHeight>().unwrap(), BlockHeight::new(42));
        assert!("-1".parse::<BlockHeight>().is_err());
        assert!("4.2".parse::<BlockHeight>().is_err());
        assert!("head".parse::<BlockHeight>().is_err());
        assert!(" 10".parse::<BlockHeight>().is_err());
        assert!("10\n".parse::<BlockHeight>().is_err());
        assert!("+10".parse::<BlockHeight>().is_err());
        assert!("".parse::<BlockHeight>().is_err());
        assert!("18446744073709551616".parse::<BlockHeight>().is_err());
    }

    #[test]
    fn component_names_form_a_closed_set() {
        for component in BalanceComponent::ALL {
            assert_eq!(component.as_str().parse::<BalanceComponent>(), Ok(component));
        }
        assert!("frozen".parse::<BalanceComponent>().is_err());
        assert!("Free".parse::<BalanceComponent>().is_err());
        assert!("misc_frozen".parse::<BalanceComponent>().is_err());
    }

    #[test]
    fn component_accessors_address_the_right_field() {
        let snapshot = AccountSnapshot::empty(Address::from("alice"), "DOT")
            .with_component(BalanceComponent::MiscFrozen, 7u64);
        assert_eq!(snapshot.misc_frozen, Amount::from(7u64));
        assert_eq!(
            snapshot.component(BalanceComponent::MiscFrozen),
            &Amount::from(7u64)
        );
        assert!(snapshot.component(BalanceComponent::Free).is_zero());
    }
}
