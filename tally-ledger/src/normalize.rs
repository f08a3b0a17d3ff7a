use std::collections::HashSet;

use serde_json::Value as JsonValue;
use tally_core::{Address, Amount, BalanceComponent, Delta};
use tally_sidecar::{Operation, OperationAddress};

use crate::error::{LedgerError, LedgerResult};

/// Convert a block's raw operations into deltas, preserving source order.
///
/// Fails on the first operation whose address shape, storage field or amount
/// is not recognized; a block is never partially normalized.
pub fn normalize_operations(operations: &[Operation]) -> LedgerResult<Vec<Delta>> {
    operations
        .iter()
        .enumerate()
        .map(|(index, op)| normalize_operation(index, op))
        .collect()
}

fn normalize_operation(index: usize, op: &Operation) -> LedgerResult<Delta> {
    let address = resolve_address(index, &op.address)?;
    let field = op
        .storage
        .field_suffix()
        .ok_or_else(|| LedgerError::MissingField {
            index,
            pallet: op.storage.pallet.clone(),
            item: op.storage.item.clone(),
        })?;
    let component = field
        .parse::<BalanceComponent>()
        .map_err(|_| LedgerError::UnknownField {
            index,
            field: field.to_string(),
        })?;
    let amount = parse_amount(index, &op.amount.value)?;
    Ok(Delta {
        index,
        address,
        component,
        amount,
    })
}

/// Distinct addresses touched by `operations`, in order of first appearance.
pub fn touched_addresses(operations: &[Operation]) -> LedgerResult<Vec<Address>> {
    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    for (index, op) in operations.iter().enumerate() {
        let address = resolve_address(index, &op.address)?;
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }
    Ok(addresses)
}

fn resolve_address(index: usize, address: &OperationAddress) -> LedgerResult<Address> {
    address.resolve().ok_or_else(|| LedgerError::MalformedAddress {
        index,
        shape: match address {
            OperationAddress::Unrecognized(value) => value.to_string(),
            other => format!("{other:?}"),
        },
    })
}

fn parse_amount(index: usize, value: &JsonValue) -> LedgerResult<Amount> {
    let parsed = match value {
        JsonValue::String(raw) => raw.parse::<Amount>().ok(),
        JsonValue::Number(number) => number
            .as_u64()
            .map(Amount::from)
            .or_else(|| number.as_i64().map(Amount::from)),
        _ => None,
    };
    parsed.ok_or_else(|| LedgerError::InvalidAmount {
        index,
        value: value.to_string(),
    })
}
