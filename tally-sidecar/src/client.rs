use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, Retryable};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tally_core::{Address, BlockHeight};
use tracing::{debug, error, warn};

use crate::error::{SidecarError, SidecarResult};
use crate::types::{BalanceInfo, BlockOperations};

const MAX_LOGGED_BODY: usize = 256;

/// Read-only view of the ledger sidecar used by the reconciliation engine.
#[async_trait]
pub trait SidecarApi: Send + Sync {
    /// Operations recorded in the block at `height`, or at chain head when `None`.
    async fn block_operations(&self, height: Option<BlockHeight>)
        -> SidecarResult<BlockOperations>;

    /// Balances of `address` at `height`, or at chain head when `None`.
    async fn balance_info(
        &self,
        address: &Address,
        height: Option<BlockHeight>,
    ) -> SidecarResult<BalanceInfo>;
}

/// Retry budget applied to every GET.
///
/// The delay before retry `k` (1-indexed) is `k * backoff_step`, with no jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_step: Duration) -> Self {
        Self {
            max_retries,
            backoff_step,
        }
    }

    pub fn delay_before(&self, retry: u32) -> Duration {
        self.backoff_step.saturating_mul(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl BackoffBuilder for RetryPolicy {
    type Backoff = LinearBackoff;

    fn build(&self) -> Self::Backoff {
        LinearBackoff {
            policy: *self,
            retry: 0,
        }
    }
}

/// Delays yielded for one request: `step, 2 * step, ...` until the budget is spent.
#[derive(Clone, Debug)]
pub struct LinearBackoff {
    policy: RetryPolicy,
    retry: u32,
}

impl Iterator for LinearBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.policy.max_retries {
            return None;
        }
        self.retry += 1;
        Some(self.policy.delay_before(self.retry))
    }
}

/// Settings for building a [`SidecarClient`].
#[derive(Clone, Debug)]
pub struct SidecarConfig {
    pub base_url: String,
    pub retry: RetryPolicy,
    /// Per-attempt deadline; unbounded when `None`.
    pub request_timeout: Option<Duration>,
}

impl SidecarConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            retry: RetryPolicy::default(),
            request_timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// HTTP client for the sidecar REST API with sequential retry and backoff.
///
/// The underlying connection pool is shared by every request; all traffic is
/// read-only GETs.
#[derive(Clone, Debug)]
pub struct SidecarClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl SidecarClient {
    pub fn new(config: SidecarConfig) -> SidecarResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|source| SidecarError::Transport {
            uri: config.base_url.clone(),
            source,
        })?;
        Ok(Self {
            client,
            base_url: config.base_url,
            retry: config.retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    /// GET `path` and decode the JSON body, retrying per the client's [`RetryPolicy`].
    ///
    /// The error of the last attempt is returned unchanged once retries are
    /// exhausted, so callers can tell a missing resource from a broken transport.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SidecarResult<T> {
        let uri = self.endpoint(path);
        let body = self.get_with_retry(&uri).await?;
        serde_json::from_str(&body).map_err(|source| SidecarError::Decode { uri, source })
    }

    async fn get_with_retry(&self, uri: &str) -> SidecarResult<String> {
        let mut retries = 0u32;
        let result = (|| self.get_once(uri))
            .retry(&self.retry)
            .when(SidecarError::is_retryable)
            .notify(|err: &SidecarError, delay: Duration| {
                retries += 1;
                warn!(
                    uri,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "sidecar request failed; retrying"
                );
            })
            .await;
        if let Err(err) = &result {
            if err.is_retryable() {
                error!(uri, retries, error = %err, "sidecar request failed; giving up");
            } else {
                debug!(uri, error = %err, "sidecar request failed without retry");
            }
        }
        result
    }

    async fn get_once(&self, uri: &str) -> SidecarResult<String> {
        let response =
            self.client
                .get(uri)
                .send()
                .await
                .map_err(|source| SidecarError::Transport {
                    uri: uri.to_string(),
                    source,
                })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| SidecarError::Transport {
                uri: uri.to_string(),
                source,
            })?;
        if !status.is_success() {
            return Err(SidecarError::Status {
                uri: uri.to_string(),
                status,
                body: truncate(&body, MAX_LOGGED_BODY),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl SidecarApi for SidecarClient {
    async fn block_operations(
        &self,
        height: Option<BlockHeight>,
    ) -> SidecarResult<BlockOperations> {
        let path = match height {
            Some(height) => format!("blocks/{height}?operations=true"),
            None => "blocks/head?operations=true".to_string(),
        };
        self.get_json(&path).await
    }

    async fn balance_info(
        &self,
        address: &Address,
        height: Option<BlockHeight>,
    ) -> SidecarResult<BalanceInfo> {
        let path = match height {
            Some(height) => format!("accounts/{address}/balance-info?at={height}"),
            None => format!("accounts/{address}/balance-info"),
        };
        self.get_json(&path).await
    }
}

fn truncate(body: &str, max: usize) -> String {
    if body.len() <= max {
        return body.to_string();
    }
    let mut end = max;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use reqwest::StatusCode;
    use serde_json::json;
    use tally_test_utils::{balance_fixture, block_fixture, operation_fixture, MockSidecar};

    fn fast_client(base_url: String) -> SidecarClient {
        SidecarClient::new(
            SidecarConfig::new(base_url)
                .with_retry(RetryPolicy::new(3, Duration::from_millis(5))),
        )
        .expect("client")
    }

    #[test]
    fn backoff_grows_linearly_with_the_retry_number() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before(2), Duration::from_secs(4));
        assert_eq!(policy.delay_before(3), Duration::from_secs(6));
    }

    #[test]
    fn backoff_yields_one_delay_per_retry() {
        let delays: Vec<Duration> = RetryPolicy::new(3, Duration::from_millis(10))
            .build()
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30)
            ]
        );
        assert_eq!(RetryPolicy::new(0, Duration::from_secs(1)).build().count(), 0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 16), "short");
        assert_eq!(truncate("ééé", 3), "é…");
    }

    #[tokio::test]
    async fn exhausts_three_retries_before_failing() -> Result<()> {
        let sidecar = MockSidecar::start().await?;
        sidecar.fail_path("/blocks/7", 4);
        let client = fast_client(sidecar.base_url());

        let err = client
            .block_operations(Some(BlockHeight::new(7)))
            .await
            .expect_err("request must fail");
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(sidecar.hits("/blocks/7"), 4);
        sidecar.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() -> Result<()> {
        let sidecar = MockSidecar::start().await?;
        sidecar.insert_block(block_fixture(
            7,
            vec![operation_fixture(json!({ "Id": "alice" }), "data.free", "10")],
        ));
        sidecar.fail_path("/blocks/7", 2);
        let client = fast_client(sidecar.base_url());

        let block = client.block_operations(Some(BlockHeight::new(7))).await?;
        assert_eq!(block.at.height, "7");
        assert_eq!(block.operations.len(), 1);
        assert_eq!(sidecar.hits("/blocks/7"), 3);
        sidecar.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn not_found_is_returned_without_retrying() -> Result<()> {
        let sidecar = MockSidecar::start().await?;
        let client = fast_client(sidecar.base_url());

        let err = client
            .balance_info(&Address::from("ghost"), Some(BlockHeight::new(3)))
            .await
            .expect_err("unknown account");
        assert!(err.is_not_found());
        assert_eq!(sidecar.hits("/accounts/ghost/balance-info"), 1);
        sidecar.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn queries_balances_at_height_and_at_head() -> Result<()> {
        let sidecar = MockSidecar::start().await?;
        sidecar.insert_balance(balance_fixture("alice", 9, "100", "0", "0", "0"));
        sidecar.insert_head_balance(balance_fixture("alice", 12, "250", "0", "0", "0"));
        let client = fast_client(format!("{}/", sidecar.base_url()));

        let at_nine = client
            .balance_info(&Address::from("alice"), Some(BlockHeight::new(9)))
            .await?;
        let at_head = client.balance_info(&Address::from("alice"), None).await?;
        assert_eq!(at_nine.free.to_string(), "100");
        assert_eq!(at_head.free.to_string(), "250");
        sidecar.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn fetches_the_head_block_without_a_height() -> Result<()> {
        let sidecar = MockSidecar::start().await?;
        sidecar.insert_head_block(block_fixture(
            42,
            vec![operation_fixture(json!("bob"), "data.reserved", "3")],
        ));
        let client = fast_client(sidecar.base_url());

        let head = client.block_operations(None).await?;
        assert_eq!(head.at.height, "42");
        assert_eq!(head.operations.len(), 1);
        assert_eq!(sidecar.hits("/blocks/head"), 1);
        sidecar.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() -> Result<()> {
        let sidecar = MockSidecar::start().await?;
        sidecar.insert_raw("/blocks/5", json!({ "unexpected": true }));
        let client = fast_client(sidecar.base_url());

        let err = client
            .block_operations(Some(BlockHeight::new(5)))
            .await
            .expect_err("decode failure");
        assert!(matches!(err, SidecarError::Decode { .. }));
        assert_eq!(sidecar.hits("/blocks/5"), 1);
        sidecar.shutdown().await;
        Ok(())
    }
}
