use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tally_core::BlockHeight;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::reconcile::{ReconcileError, ReconcileReport, Reconciler, Verdict};

/// Cooperative stop flag shared between the signal handler and the crawl loop.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`ShutdownSignal::trigger`] has been called.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives the outcome of every height the crawler visits.
pub trait CrawlReporter: Send + Sync {
    fn on_balanced(&self, report: &ReconcileReport);
    fn on_mismatch(&self, report: &ReconcileReport);
    fn on_error(&self, height: BlockHeight, error: &ReconcileError);
}

/// Reports crawl progress through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter {
    log_successes: bool,
}

impl TracingReporter {
    /// Balanced heights are logged at info when `log_successes` is set, at debug otherwise.
    pub fn new(log_successes: bool) -> Self {
        Self { log_successes }
    }
}

impl CrawlReporter for TracingReporter {
    fn on_balanced(&self, report: &ReconcileReport) {
        if self.log_successes {
            info!(
                height = %report.height,
                accounts = report.accounts,
                deltas = report.deltas,
                "successfully reconciled block"
            );
        } else {
            debug!(
                height = %report.height,
                accounts = report.accounts,
                deltas = report.deltas,
                "successfully reconciled block"
            );
        }
    }

    fn on_mismatch(&self, report: &ReconcileReport) {
        match &report.verdict {
            Verdict::Balanced => {}
            Verdict::Mismatch {
                address,
                discrepancies,
            } => {
                for entry in discrepancies {
                    warn!(
                        height = %report.height,
                        %address,
                        component = %entry.component,
                        computed = %entry.computed,
                        reported = %entry.reported,
                        delta = %entry.delta,
                        "balance component mismatch"
                    );
                }
                error!(height = %report.height, %address, "failed to reconcile block: balance mismatch");
            }
            Verdict::MissingSnapshot { address, side } => {
                error!(
                    height = %report.height,
                    %address,
                    %side,
                    "failed to reconcile block: account snapshot missing"
                );
            }
        }
    }

    fn on_error(&self, height: BlockHeight, error: &ReconcileError) {
        error!(%height, error = %error, "failed to reconcile block");
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrawlError {
    #[error("end height {end} precedes start height {start}")]
    EmptyRange {
        start: BlockHeight,
        end: BlockHeight,
    },
}

/// Result of a crawl over several heights.
#[derive(Clone, Debug)]
pub struct CrawlSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Heights whose reconciliation ran to completion, successfully or not.
    pub attempted: usize,
    /// Heights that failed, in crawl order.
    pub failed: Vec<BlockHeight>,
    /// Height abandoned mid-flight by a shutdown request.
    pub abandoned: Option<BlockHeight>,
    pub interrupted: bool,
}

impl CrawlSummary {
    fn begin() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            attempted: 0,
            failed: Vec::new(),
            abandoned: None,
            interrupted: false,
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    /// Every attempted height balanced and the crawl was not cut short.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Default delay between chain head queries once follow mode has caught up.
pub const DEFAULT_HEAD_POLL_INTERVAL: Duration = Duration::from_secs(6);

/// Drives the reconciler over heights, one at a time.
///
/// A failure at one height is reported and recorded, never propagated, so a
/// long crawl survives bad blocks.
pub struct Crawler {
    reconciler: Reconciler,
    reporter: Arc<dyn CrawlReporter>,
    shutdown: ShutdownSignal,
    head_poll_interval: Duration,
}

impl Crawler {
    pub fn new(
        reconciler: Reconciler,
        reporter: Arc<dyn CrawlReporter>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            reconciler,
            reporter,
            shutdown,
            head_poll_interval: DEFAULT_HEAD_POLL_INTERVAL,
        }
    }

    pub fn with_head_poll_interval(mut self, interval: Duration) -> Self {
        self.head_poll_interval = interval;
        self
    }

    /// Reconcile a single height; `true` when it balanced.
    pub async fn crawl_one(&self, height: BlockHeight) -> bool {
        match self.reconciler.reconcile_height(height).await {
            Ok(report) if report.is_ok() => {
                self.reporter.on_balanced(&report);
                true
            }
            Ok(report) => {
                self.reporter.on_mismatch(&report);
                false
            }
            Err(err) => {
                self.reporter.on_error(height, &err);
                false
            }
        }
    }

    /// Crawl `start..=end`, or follow the chain from `start` until shutdown when `end` is `None`.
    ///
    /// Follow mode never reconciles past the chain head: once it catches up it
    /// polls the head every `head_poll_interval`.
    pub async fn crawl_range(
        &self,
        start: BlockHeight,
        end: Option<BlockHeight>,
    ) -> Result<CrawlSummary, CrawlError> {
        match end {
            Some(end) if end < start => Err(CrawlError::EmptyRange { start, end }),
            Some(end) => {
                info!(%start, %end, "crawling block range");
                Ok(self
                    .crawl_heights((start.get()..=end.get()).map(BlockHeight::new))
                    .await)
            }
            None => Ok(self.follow(start).await),
        }
    }

    /// Crawl `heights` in the given order.
    pub async fn crawl_set(&self, heights: &[BlockHeight]) -> CrawlSummary {
        info!(count = heights.len(), "crawling block set");
        self.crawl_heights(heights.iter().copied()).await
    }

    async fn crawl_heights(&self, heights: impl IntoIterator<Item = BlockHeight>) -> CrawlSummary {
        let mut summary = CrawlSummary::begin();
        for height in heights {
            if !self.step(height, &mut summary).await {
                break;
            }
        }
        summary.finish()
    }

    async fn follow(&self, start: BlockHeight) -> CrawlSummary {
        info!(%start, "following the chain until interrupted");
        let mut summary = CrawlSummary::begin();
        let mut head = None;
        let mut next = Some(start);
        while let Some(height) = next {
            if !self.wait_for_height(height, &mut head, &mut summary).await {
                break;
            }
            if !self.step(height, &mut summary).await {
                break;
            }
            next = height.next();
        }
        summary.finish()
    }

    /// Poll the chain head until it reaches `height`; `false` when shutdown cut the wait short.
    ///
    /// `known_head` caches the last head seen, so the sidecar is only asked
    /// again once the crawl catches up with it.
    async fn wait_for_height(
        &self,
        height: BlockHeight,
        known_head: &mut Option<BlockHeight>,
        summary: &mut CrawlSummary,
    ) -> bool {
        loop {
            if known_head.is_some_and(|head| head >= height) {
                return true;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    summary.interrupted = true;
                    return false;
                }
                head = self.reconciler.chain_head() => match head {
                    Ok(head) => {
                        *known_head = Some(head);
                        if head >= height {
                            return true;
                        }
                        debug!(%height, %head, "caught up with the chain head; waiting");
                    }
                    Err(err) => warn!(%height, error = %err, "failed to query the chain head"),
                }
            }
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => {
                    summary.interrupted = true;
                    return false;
                }
                _ = tokio::time::sleep(self.head_poll_interval) => {}
            }
        }
    }

    /// Run one height unless shutdown was requested; `false` stops the crawl.
    async fn step(&self, height: BlockHeight, summary: &mut CrawlSummary) -> bool {
        if self.shutdown.triggered() {
            summary.interrupted = true;
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                warn!(%height, "shutdown requested; abandoning in-flight reconciliation");
                summary.interrupted = true;
                summary.abandoned = Some(height);
                false
            }
            balanced = self.crawl_one(height) => {
                summary.attempted += 1;
                if !balanced {
                    summary.failed.push(height);
                }
                true
            }
        }
    }
}
