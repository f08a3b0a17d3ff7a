use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use tally_config::{LogFormat, TallyConfig};
use tally_core::BlockHeight;
use tally_ledger::LedgerAccountant;
use tally_sidecar::{RetryPolicy, SidecarClient, SidecarConfig};
use tracing::{info, warn};

use crate::crawl::{CrawlSummary, Crawler, ShutdownSignal, TracingReporter};
use crate::reconcile::Reconciler;
use crate::telemetry;

#[derive(Parser, Debug)]
#[command(
    name = "tally",
    author,
    version,
    about = "Re-derive account balances block by block and flag ledger mismatches"
)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["single_height", "block_set", "start_block"])
))]
pub struct Cli {
    /// TOML config file (defaults to ./tally.toml when present)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Base URL of the ledger sidecar
    #[arg(short = 'S', long = "sidecar-url")]
    pub sidecar_url: Option<String>,
    /// Reconcile a single block
    #[arg(short = 'i', long = "single-height")]
    pub single_height: Option<u64>,
    /// Reconcile these blocks, in order
    #[arg(short = 'b', long = "block-set", num_args = 1.., value_delimiter = ',')]
    pub block_set: Option<Vec<u64>>,
    /// First block of a range; without --end-block the crawl follows the chain until interrupted
    #[arg(short = 's', long = "start-block")]
    pub start_block: Option<u64>,
    /// Last block of the range, inclusive
    #[arg(short = 'e', long = "end-block", requires = "start_block")]
    pub end_block: Option<u64>,
    /// Log every successfully reconciled block
    #[arg(short = 'v', long)]
    pub verbose: bool,
    /// Log output format: pretty, compact or json
    #[arg(long = "log-format")]
    pub log_format: Option<LogFormat>,
    /// Also write JSON logs to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

/// Which heights a run covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CrawlMode {
    Single(BlockHeight),
    Set(Vec<BlockHeight>),
    Range {
        start: BlockHeight,
        end: Option<BlockHeight>,
    },
}

impl Cli {
    pub fn mode(&self) -> Result<CrawlMode> {
        if let Some(height) = self.single_height {
            return Ok(CrawlMode::Single(BlockHeight::new(height)));
        }
        if let Some(heights) = &self.block_set {
            return Ok(CrawlMode::Set(
                heights.iter().copied().map(BlockHeight::new).collect(),
            ));
        }
        if let Some(start) = self.start_block {
            return Ok(CrawlMode::Range {
                start: BlockHeight::new(start),
                end: self.end_block.map(BlockHeight::new),
            });
        }
        bail!("no crawl mode selected; pass --single-height, --block-set or --start-block")
    }

    /// Apply flag overrides on top of file and environment configuration.
    pub fn apply_overrides(&self, config: &mut TallyConfig) {
        if let Some(url) = &self.sidecar_url {
            config.sidecar.base_url = url.clone();
        }
        if self.verbose {
            config.crawl.log_successes = true;
        }
        if let Some(format) = &self.log_format {
            config.log.format = format.clone();
        }
        if let Some(file) = &self.log_file {
            config.log.file = Some(file.clone());
        }
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = TallyConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    let _guard = telemetry::init_tracing(&config.log)?;
    let mode = cli.mode()?;

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("detected kill signal; stopping crawl");
            signal.trigger();
        }
    });

    let summary = execute(&config, mode, shutdown).await?;
    print_summary(&summary);
    if summary.interrupted {
        bail!("crawl interrupted before completion");
    }
    if !summary.failed.is_empty() {
        bail!(
            "{} of {} heights failed reconciliation",
            summary.failed.len(),
            summary.attempted
        );
    }
    Ok(())
}

/// Build the sidecar client and crawler from `config` and run `mode`.
pub async fn execute(
    config: &TallyConfig,
    mode: CrawlMode,
    shutdown: ShutdownSignal,
) -> Result<CrawlSummary> {
    let mut sidecar = SidecarConfig::new(config.sidecar.base_url.clone()).with_retry(
        RetryPolicy::new(config.sidecar.max_retries, config.sidecar.backoff_step()),
    );
    if let Some(timeout) = config.sidecar.request_timeout() {
        sidecar = sidecar.with_request_timeout(timeout);
    }
    let client = SidecarClient::new(sidecar).context("failed to build sidecar client")?;
    info!(sidecar = client.base_url(), "starting balance reconciliation");

    let reconciler = Reconciler::new(
        Arc::new(client),
        LedgerAccountant::new(config.crawl.missing_account_policy),
    );
    let reporter = Arc::new(TracingReporter::new(config.crawl.log_successes));
    let crawler = Crawler::new(reconciler, reporter, shutdown)
        .with_head_poll_interval(config.crawl.head_poll_interval());

    let summary = match mode {
        CrawlMode::Single(height) => crawler.crawl_set(&[height]).await,
        CrawlMode::Set(heights) => crawler.crawl_set(&heights).await,
        CrawlMode::Range { start, end } => crawler.crawl_range(start, end).await?,
    };
    let elapsed = summary.finished_at - summary.started_at;
    info!(
        attempted = summary.attempted,
        failed = summary.failed.len(),
        elapsed_ms = elapsed.num_milliseconds(),
        "crawl finished"
    );
    Ok(summary)
}

fn print_summary(summary: &CrawlSummary) {
    if summary.failed.is_empty() {
        println!("reconciled {} heights, none failed", summary.attempted);
    } else {
        let failed: Vec<String> = summary.failed.iter().map(ToString::to_string).collect();
        println!("failed heights: {}", failed.join(","));
    }
    if let Some(height) = summary.abandoned {
        println!("interrupted while reconciling height {height}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("tally").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn selects_each_mode() {
        assert_eq!(
            parse(&["-i", "7"]).unwrap().mode().unwrap(),
            CrawlMode::Single(BlockHeight::new(7))
        );
        assert_eq!(
            parse(&["--block-set", "3", "1", "2"]).unwrap().mode().unwrap(),
            CrawlMode::Set(vec![
                BlockHeight::new(3),
                BlockHeight::new(1),
                BlockHeight::new(2)
            ])
        );
        assert_eq!(
            parse(&["-b", "4,5"]).unwrap().mode().unwrap(),
            CrawlMode::Set(vec![BlockHeight::new(4), BlockHeight::new(5)])
        );
        assert_eq!(
            parse(&["-s", "10", "-e", "12"]).unwrap().mode().unwrap(),
            CrawlMode::Range {
                start: BlockHeight::new(10),
                end: Some(BlockHeight::new(12))
            }
        );
        assert_eq!(
            parse(&["--start-block", "10"]).unwrap().mode().unwrap(),
            CrawlMode::Range {
                start: BlockHeight::new(10),
                end: None
            }
        );
    }

    #[test]
    fn requires_exactly_one_mode() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["-i", "1", "-s", "2"]).is_err());
        assert!(parse(&["-e", "5"]).is_err());
        assert!(parse(&["-i", "-3"]).is_err());
    }

    #[test]
    fn flags_override_configuration() {
        let cli = parse(&[
            "-i",
            "1",
            "-S",
            "http://10.0.0.2:8080",
            "-v",
            "--log-format",
            "json",
        ])
        .unwrap();
        let mut config = TallyConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.sidecar.base_url, "http://10.0.0.2:8080");
        assert!(config.crawl.log_successes);
        assert_eq!(config.log.format, LogFormat::Json);
    }
}
