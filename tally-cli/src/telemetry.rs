use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tally_config::{LogFormat, LogSettings};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber: stderr in the configured format, plus an
/// optional JSON log file.
///
/// `RUST_LOG` takes precedence over `settings.level`. Keep the returned guard
/// alive until exit or buffered file output is lost.
pub fn init_tracing(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("invalid log level `{}`", settings.level))?,
    };

    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow!("log file path {} has no file name", path.display()))?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("failed to create log directory {}", directory.display()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let installed = match settings.format {
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
    };
    installed.context("failed to install tracing subscriber")?;
    Ok(guard)
}
