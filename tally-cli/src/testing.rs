use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tally_core::{Address, BlockHeight};
use tally_sidecar::{BalanceInfo, BlockOperations, SidecarApi, SidecarError, SidecarResult, StatusCode};
use tally_test_utils::{balance_fixture, block_fixture};
use tokio::sync::Notify;

/// Sidecar double answering from fixtures, recording every request path.
#[derive(Default)]
pub(crate) struct InMemorySidecar {
    blocks: HashMap<u64, Value>,
    balances: HashMap<(String, u64), Value>,
    broken_blocks: HashSet<u64>,
    broken_accounts: HashSet<String>,
    stalled_blocks: HashMap<u64, Arc<Notify>>,
    head: Mutex<Option<u64>>,
    requests: Mutex<Vec<String>>,
}

impl InMemorySidecar {
    pub fn with_block(self, height: u64, operations: Vec<Value>) -> Self {
        self.with_block_at(height, block_fixture(height, operations))
    }

    /// Serve `block` for `height`, whatever height the payload claims.
    pub fn with_block_at(mut self, height: u64, block: Value) -> Self {
        self.blocks.insert(height, block);
        self
    }

    pub fn with_balance(self, address: &str, height: u64, free: &str) -> Self {
        self.with_balance_components(address, height, [free, "0", "0", "0"])
    }

    pub fn with_balance_components(
        mut self,
        address: &str,
        height: u64,
        [free, reserved, misc_frozen, fee_frozen]: [&str; 4],
    ) -> Self {
        let fixture = balance_fixture(address, height, free, reserved, misc_frozen, fee_frozen);
        self.balances
            .insert((address.to_string(), height), fixture.body);
        self
    }

    /// Every block request for `height` fails with a server error.
    pub fn with_broken_block(mut self, height: u64) -> Self {
        self.broken_blocks.insert(height);
        self
    }

    /// Every balance request for `address` fails with a server error.
    pub fn with_broken_account(mut self, address: &str) -> Self {
        self.broken_accounts.insert(address.to_string());
        self
    }

    /// Report `height` as the chain head.
    pub fn with_head(self, height: u64) -> Self {
        self.set_head(height);
        self
    }

    pub fn set_head(&self, height: u64) {
        *self.head.lock().expect("head poisoned") = Some(height);
    }

    /// Requests for block `height` never complete; `started` is notified when one arrives.
    pub fn with_stalled_block(mut self, height: u64, started: Arc<Notify>) -> Self {
        self.stalled_blocks.insert(height, started);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("request log poisoned").clone()
    }

    fn record(&self, path: &str) {
        self.requests
            .lock()
            .expect("request log poisoned")
            .push(path.to_string());
    }
}

fn failure(uri: String, status: StatusCode) -> SidecarError {
    SidecarError::Status {
        uri,
        status,
        body: String::new(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(uri: String, body: &Value) -> SidecarResult<T> {
    serde_json::from_value(body.clone()).map_err(|source| SidecarError::Decode { uri, source })
}

#[async_trait]
impl SidecarApi for InMemorySidecar {
    async fn block_operations(
        &self,
        height: Option<BlockHeight>,
    ) -> SidecarResult<BlockOperations> {
        let Some(height) = height else {
            let uri = "blocks/head".to_string();
            self.record(&uri);
            let head = *self.head.lock().expect("head poisoned");
            return match head {
                Some(head) => match self.blocks.get(&head) {
                    Some(body) => decode(uri, body),
                    None => decode(uri, &block_fixture(head, Vec::new())),
                },
                None => Err(failure(uri, StatusCode::NOT_FOUND)),
            };
        };
        let height = height.get();
        let uri = format!("blocks/{height}");
        self.record(&uri);
        if let Some(started) = self.stalled_blocks.get(&height) {
            started.notify_one();
            std::future::pending::<()>().await;
        }
        if self.broken_blocks.contains(&height) {
            return Err(failure(uri, StatusCode::INTERNAL_SERVER_ERROR));
        }
        match self.blocks.get(&height) {
            Some(body) => decode(uri, body),
            None => Err(failure(uri, StatusCode::NOT_FOUND)),
        }
    }

    async fn balance_info(
        &self,
        address: &Address,
        height: Option<BlockHeight>,
    ) -> SidecarResult<BalanceInfo> {
        let Some(height) = height.map(BlockHeight::get) else {
            let uri = format!("accounts/{address}/balance-info");
            self.record(&uri);
            return Err(failure(uri, StatusCode::NOT_FOUND));
        };
        let uri = format!("accounts/{address}/balance-info?at={height}");
        self.record(&uri);
        if self.broken_accounts.contains(address.as_str()) {
            return Err(failure(uri, StatusCode::SERVICE_UNAVAILABLE));
        }
        match self.balances.get(&(address.to_string(), height)) {
            Some(body) => decode(uri, body),
            None => Err(failure(uri, StatusCode::NOT_FOUND)),
        }
    }
}
