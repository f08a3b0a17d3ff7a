//! Mock ledger sidecar and payload fixtures for exercising Tally end to end.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Default)]
struct SidecarState {
    blocks: HashMap<u64, Value>,
    head_block: Option<Value>,
    balances: HashMap<(String, Option<u64>), Value>,
    raw: HashMap<String, Value>,
    failures: HashMap<String, usize>,
    hits: HashMap<String, usize>,
}

/// In-process HTTP server speaking the sidecar's block and balance endpoints.
///
/// Unknown resources answer `404`. Failures injected with [`MockSidecar::fail_path`]
/// answer `500` and take precedence over fixtures. Every request is counted
/// by path, query excluded.
pub struct MockSidecar {
    addr: SocketAddr,
    state: Arc<Mutex<SidecarState>>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockSidecar {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(Mutex::new(SidecarState::default()));
        let service_state = state.clone();
        let make_svc = make_service_fn(move |_conn| {
            let state = service_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle_request(&state, req)) }
                }))
            }
        });
        let bind: SocketAddr = ([127, 0, 0, 1], 0).into();
        let server = Server::try_bind(&bind)?.serve(make_svc);
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async {
                let _ = rx.await;
            });
            if let Err(err) = graceful.await {
                warn!(error = %err, "mock sidecar exited with error");
            }
        });
        debug!(%addr, "mock sidecar listening");
        Ok(Self {
            addr,
            state,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Serve `block` (see [`block_fixture`]) under its own `at.height`.
    pub fn insert_block(&self, block: Value) {
        let height = block["at"]["height"]
            .as_str()
            .and_then(|raw| raw.parse::<u64>().ok())
            .expect("block fixture must carry a numeric at.height");
        self.lock().blocks.insert(height, block);
    }

    /// Serve `block` for `/blocks/head`.
    pub fn insert_head_block(&self, block: Value) {
        self.lock().head_block = Some(block);
    }

    pub fn insert_balance(&self, fixture: BalanceFixture) {
        self.lock()
            .balances
            .insert((fixture.address, Some(fixture.height)), fixture.body);
    }

    /// Serve `fixture` when balance-info is requested without `at`.
    pub fn insert_head_balance(&self, fixture: BalanceFixture) {
        self.lock()
            .balances
            .insert((fixture.address, None), fixture.body);
    }

    /// Serve an arbitrary JSON body for `path`, whatever the query.
    pub fn insert_raw(&self, path: &str, body: Value) {
        self.lock().raw.insert(path.to_string(), body);
    }

    /// Answer the next `times` requests for `path` with `500`.
    pub fn fail_path(&self, path: &str, times: usize) {
        self.lock().failures.insert(path.to_string(), times);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.lock().hits.get(path).copied().unwrap_or(0)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SidecarState> {
        self.state.lock().expect("mock sidecar state poisoned")
    }
}

impl Drop for MockSidecar {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn handle_request(state: &Mutex<SidecarState>, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let query: HashMap<String, String> = req
        .uri()
        .query()
        .and_then(|raw| serde_urlencoded::from_str(raw).ok())
        .unwrap_or_default();
    let mut state = state.lock().expect("mock sidecar state poisoned");
    *state.hits.entry(path.clone()).or_default() += 1;

    if req.method() != Method::GET {
        return respond(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "code": 405, "message": "Method Not Allowed" }),
        );
    }
    if let Some(remaining) = state.failures.get_mut(&path) {
        if *remaining > 0 {
            *remaining -= 1;
            return respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "code": 500, "message": "injected failure" }),
            );
        }
    }
    if let Some(body) = state.raw.get(&path) {
        return respond(StatusCode::OK, body.clone());
    }

    let at = match query.get("at").map(|raw| raw.parse::<u64>()) {
        Some(Ok(height)) => Some(height),
        Some(Err(_)) => {
            return respond(
                StatusCode::BAD_REQUEST,
                json!({ "code": 400, "message": "at must be a block height" }),
            )
        }
        None => None,
    };
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let body = match segments.as_slice() {
        ["blocks", "head"] => state.head_block.clone(),
        ["blocks", height] => height
            .parse::<u64>()
            .ok()
            .and_then(|height| state.blocks.get(&height).cloned()),
        ["accounts", address, "balance-info"] => {
            state.balances.get(&(address.to_string(), at)).cloned()
        }
        _ => None,
    };
    match body {
        Some(body) => respond(StatusCode::OK, body),
        None => respond(
            StatusCode::NOT_FOUND,
            json!({ "code": 404, "message": "Not Found" }),
        ),
    }
}

fn respond(status: StatusCode, body: Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("static response parts are valid")
}

/// One `system.account` operation crediting `value` to `field` (e.g. `"data.free"`).
pub fn operation_fixture(address: Value, field: &str, value: &str) -> Value {
    json!({
        "operationId": {
            "operationIndex": 0,
            "phase": { "variant": "applyExtrinsic", "extrinsicIndex": 1 },
            "parentSpanId": [],
            "eventIndex": 0
        },
        "address": address,
        "storage": { "pallet": "system", "item": "account", "field": field },
        "amount": { "value": value, "curency": { "symbol": "DOT" } }
    })
}

/// Block payload at `height` holding `operations` in order.
pub fn block_fixture(height: u64, operations: Vec<Value>) -> Value {
    let operations: Vec<Value> = operations
        .into_iter()
        .enumerate()
        .map(|(index, mut op)| {
            if let Some(id) = op.get_mut("operationId") {
                id["operationIndex"] = json!(index);
            }
            op
        })
        .collect();
    json!({
        "at": { "hash": format!("0x{height:064x}"), "height": height.to_string() },
        "operations": operations
    })
}

/// Balance-info payload for `address` at `height`.
pub struct BalanceFixture {
    pub address: String,
    pub height: u64,
    pub body: Value,
}

pub fn balance_fixture(
    address: &str,
    height: u64,
    free: &str,
    reserved: &str,
    misc_frozen: &str,
    fee_frozen: &str,
) -> BalanceFixture {
    BalanceFixture {
        address: address.to_string(),
        height,
        body: json!({
            "at": { "hash": format!("0x{height:064x}"), "height": height.to_string() },
            "nonce": "0",
            "tokenSymbol": "DOT",
            "free": free,
            "reserved": reserved,
            "miscFrozen": misc_frozen,
            "feeFrozen": fee_frozen,
            "locks": []
        }),
    }
}
