//! # Local Logger
//!
//! Installs the process-wide `tracing` subscriber:
//! - console output, human readable,
//! - optional daily rotating files in a log directory (non-blocking writer),
//! - level from `RUST_LOG` when set, otherwise from the configured level.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rotated files kept per application before the oldest is removed.
pub const DEFAULT_MAX_LOG_FILES: usize = 7;

/// The filter used by [`init_logging`]: `RUST_LOG` wins over `level`.
pub fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level '{}'", level)),
    }
}

/// Initializes logging once at program start.
///
/// # Arguments
/// * `level` - Default filter, e.g. `"info"` or `"lib_ingest=debug,info"`.
/// * `log_dir` - When set, files named `{app_name}.YYYY-MM-DD.log` are written there too.
/// * `app_name` - Log file prefix.
///
/// The returned guard flushes the file writer when dropped; keep it alive in `main`.
pub fn init_logging(
    level: &str,
    log_dir: Option<&Path>,
    app_name: &str,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = build_filter(level)?;

    let console_layer = fmt::layer().with_target(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix(app_name)
                .filename_suffix("log")
                .max_log_files(DEFAULT_MAX_LOG_FILES)
                .build(dir)
                .with_context(|| format!("cannot open log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
