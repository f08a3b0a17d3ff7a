use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tally_core::{AccountSnapshot, Address, Amount};

/// Block reference attached to every sidecar payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtBlock {
    #[serde(default)]
    pub hash: String,
    pub height: String,
}

/// Response of `GET /blocks/{height}?operations=true`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockOperations {
    pub at: AtBlock,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

/// One balance-changing operation as recorded by the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Phase, span and event coordinates; opaque to reconciliation.
    #[serde(default)]
    pub operation_id: Option<JsonValue>,
    pub address: OperationAddress,
    pub storage: StorageResourceId,
    pub amount: OperationAmount,
}

/// The account an operation touches, in any of the shapes the node emits.
///
/// Variant order is the resolution priority: a wrapped `Id` wins over a
/// wrapped `id`, which wins over a bare string. Anything else is kept
/// verbatim so the normalizer can reject it with context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationAddress {
    Wrapped {
        #[serde(rename = "Id")]
        id: String,
    },
    WrappedLower {
        id: String,
    },
    Plain(String),
    Unrecognized(JsonValue),
}

impl OperationAddress {
    /// Plain address for the recognized shapes.
    pub fn resolve(&self) -> Option<Address> {
        match self {
            OperationAddress::Wrapped { id }
            | OperationAddress::WrappedLower { id }
            | OperationAddress::Plain(id) => Some(Address::new(id.as_str())),
            OperationAddress::Unrecognized(_) => None,
        }
    }
}

/// Storage location written by an operation, e.g. `system.account` / `data.free`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageResourceId {
    pub pallet: String,
    pub item: String,
    #[serde(default)]
    pub field: Option<String>,
}

impl StorageResourceId {
    /// Segment after the first `.` of `field`, if any.
    pub fn field_suffix(&self) -> Option<&str> {
        self.field
            .as_deref()
            .and_then(|field| field.split('.').nth(1))
            .filter(|suffix| !suffix.is_empty())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyId {
    pub symbol: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationAmount {
    /// Kept as text until normalization so one bad amount is reported per operation.
    pub value: JsonValue,
    #[serde(default, alias = "curency")]
    pub currency: Option<CurrencyId>,
}

/// Response of `GET /accounts/{address}/balance-info`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceInfo {
    #[serde(default)]
    pub at: AtBlock,
    #[serde(default)]
    pub nonce: Option<JsonValue>,
    #[serde(default)]
    pub token_symbol: String,
    pub free: Amount,
    pub reserved: Amount,
    pub misc_frozen: Amount,
    pub fee_frozen: Amount,
    #[serde(default)]
    pub locks: Vec<BalanceLock>,
}

impl BalanceInfo {
    pub fn into_snapshot(self, address: Address) -> AccountSnapshot {
        AccountSnapshot {
            address,
            token_symbol: self.token_symbol,
            free: self.free,
            reserved: self.reserved,
            misc_frozen: self.misc_frozen,
            fee_frozen: self.fee_frozen,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceLock {
    pub id: String,
    pub amount: Amount,
    #[serde(default)]
    pub reasons: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_shapes_resolve_in_priority_order() {
        let upper: OperationAddress = serde_json::from_value(json!({ "Id": "X" })).unwrap();
        let lower: OperationAddress = serde_json::from_value(json!({ "id": "X" })).unwrap();
        let plain: OperationAddress = serde_json::from_value(json!("X")).unwrap();
        let both: OperationAddress =
            serde_json::from_value(json!({ "Id": "upper", "id": "lower" })).unwrap();
        let other: OperationAddress = serde_json::from_value(json!({ "Index": 4 })).unwrap();

        for shape in [&upper, &lower, &plain] {
            assert_eq!(shape.resolve(), Some(Address::from("X")));
        }
        assert_eq!(both.resolve(), Some(Address::from("upper")));
        assert_eq!(other.resolve(), None);
    }

    #[test]
    fn field_suffix_takes_the_second_segment() {
        let storage = |field: Option<&str>| StorageResourceId {
            pallet: "system".into(),
            item: "account".into(),
            field: field.map(str::to_string),
        };
        assert_eq!(storage(Some("data.free")).field_suffix(), Some("free"));
        assert_eq!(storage(Some("data.feeFrozen.x")).field_suffix(), Some("feeFrozen"));
        assert_eq!(storage(Some("free")).field_suffix(), None);
        assert_eq!(storage(Some("data.")).field_suffix(), None);
        assert_eq!(storage(None).field_suffix(), None);
    }

    #[test]
    fn decodes_sidecar_payloads() {
        let block: BlockOperations = serde_json::from_value(json!({
            "at": { "hash": "0xabc", "height": "12" },
            "operations": [{
                "operationId": { "operationIndex": 0, "eventIndex": 1 },
                "address": { "Id": "alice" },
                "storage": { "pallet": "system", "item": "account", "field": "data.free" },
                "amount": { "value": "-150", "curency": { "symbol": "DOT" } }
            }]
        }))
        .unwrap();
        assert_eq!(block.at.height, "12");
        assert_eq!(block.operations.len(), 1);
        let op = &block.operations[0];
        assert_eq!(op.amount.currency.as_ref().map(|c| c.symbol.as_str()), Some("DOT"));

        let info: BalanceInfo = serde_json::from_value(json!({
            "at": { "hash": "0xabc", "height": "12" },
            "nonce": "3",
            "tokenSymbol": "DOT",
            "free": "123456789012345678901234567890",
            "reserved": "0",
            "miscFrozen": "5",
            "feeFrozen": "5",
            "locks": [{ "id": "staking ", "amount": "5", "reasons": "All" }]
        }))
        .unwrap();
        let snapshot = info.into_snapshot(Address::from("alice"));
        assert_eq!(snapshot.free.to_string(), "123456789012345678901234567890");
        assert_eq!(snapshot.token_symbol, "DOT");
    }
}
