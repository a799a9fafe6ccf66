//! Tracing setup for the daemon and the one-shot commands.
//!
//! Events emitted by this crate share a small field vocabulary so the JSON
//! log can be filtered per target:
//! - `service`: configured target name
//! - `endpoint`: `host:port` being probed
//! - `consecutive_failures`: failure streak length at the time of the event
//! - `error_kind` / `error`: [`ProbeError::kind`](crate::prober::ProbeError::kind)
//!   and its message
//! - `recipients`: addresses an alert went to
//!
//! Levels: probe failures are `warn` (a refused connection only on the first
//! failure of a streak, `debug` after that), recovery and sent alerts are
//! `info`, notification failures are `error`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: this crate at `info`, the HTTP and
/// SMTP stacks only at `warn`.
const DEFAULT_FILTER: &str = "warn,downwatch=info";

/// File name prefix of the rotated daemon log.
const LOG_FILE_PREFIX: &str = "downwatch.log";

/// Keeps the non-blocking file writer alive. Dropping it flushes the log.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install logging for `start`: a JSON file in `logs_dir`, rotated daily
/// (`downwatch.log.YYYY-MM-DD`), plus readable output on stderr.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created or a global
/// subscriber is already installed.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(file_writer),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("failed to install log subscriber")?;

    Ok(LoggingGuard { _guard: guard })
}

/// Install stderr-only logging for `check` and `validate`, keeping stdout
/// free for the report.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_cli() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
