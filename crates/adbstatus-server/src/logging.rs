//! Logging initialization.
//!
//! - **Background**: JSON logs to daily rolling files + compact logs to stdout
//! - **Foreground**: Pretty logs to stdout with span events

use std::path::Path;
use std::sync::OnceLock;

use adbstatus_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding `logging.level` (below `RUST_LOG`).
pub const LOG_LEVEL_ENV: &str = "ADBSTATUS_LOG_LEVEL";

/// File name prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "adbstatusd.log";

/// Keep the non-blocking writers alive for the lifetime of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging.
///
/// The filter comes from `RUST_LOG`, else [`LOG_LEVEL_ENV`], else `config.level`.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or the log directory cannot
/// be created.
pub fn init(background: bool, config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = build_filter(&config.level)?;

    if background {
        init_background(env_filter, &config.directory)?;
    } else {
        init_foreground(env_filter);
    }

    Ok(())
}

fn build_filter(default_level: &str) -> anyhow::Result<EnvFilter> {
    let level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    Ok(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?)
}

fn init_background(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .try_init()?;

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    Ok(())
}

fn init_foreground(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // A second init in the same process (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .try_init();
}
