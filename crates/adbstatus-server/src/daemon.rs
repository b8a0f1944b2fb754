//! Daemon lifecycle.
//!
//! [`run`] owns the pid-file lock, the monitor, the optional sleep/wake hook and
//! the HTTPS status server for the lifetime of the process. [`stop`] and
//! [`status`] are the client side used by `adbstatusd stop|status`.

use std::path::Path;
use std::process;
use std::time::Duration;

use adbstatus_core::pidfile::{is_process_alive, running_pid, terminate};
use adbstatus_core::{AdbBridge, AdbStatusError, Config, Monitor, PidFile, SleepWatcher};
use anyhow::{bail, Context, Result};
use axum_server::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::create_router;
use crate::state::AppState;
use crate::tls;

/// Slack on top of the configured shutdown budget in [`stop_timeout`].
const STOP_MARGIN: Duration = Duration::from_secs(5);

const STOP_POLL: Duration = Duration::from_millis(100);

/// Result of [`stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No live daemon was recorded in the pid file.
    NotRunning,
    /// The daemon with this pid exited.
    Stopped(u32),
    /// The daemon with this pid was signalled but is still alive.
    StillRunning(u32),
}

/// How long `stop` waits after SIGTERM: the server and monitor grace period,
/// one action script running out its timeout, and [`STOP_MARGIN`].
#[must_use]
pub fn stop_timeout(config: &Config) -> Duration {
    config.monitor.shutdown_grace() + config.monitor.action_timeout() + STOP_MARGIN
}

/// Startup checks that must fail in the calling process, before `start`
/// forks: the bind address and the TLS certificate and key.
///
/// # Errors
///
/// Returns the same errors [`run`] would return for these checks.
pub fn preflight(config: &Config) -> Result<()> {
    if !config.server.enabled {
        return Ok(());
    }
    tls::socket_addr(&config.server).context("cannot start the status server")?;
    // No IO or timer driver, so no threads exist when the runtime is dropped.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("cannot create the startup runtime")?;
    runtime
        .block_on(tls::load(&config.server.tls))
        .context("cannot start the status server")?;
    Ok(())
}

/// Runs the daemon until SIGTERM/SIGINT or a fatal server error.
///
/// # Errors
///
/// Returns an error if the pid-file lock is held, the TLS material cannot be
/// loaded, or the bind address is invalid. Failures after startup are logged
/// and end the run instead.
pub async fn run(config: Config) -> Result<()> {
    let mut lock = PidFile::acquire(&config.daemon.pid_file)
        .map_err(AdbStatusError::from)
        .context("cannot take the daemon pid file")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        pid_file = %lock.path().display(),
        rules = config.rules.len(),
        "adbstatusd starting"
    );

    // TLS problems are fatal before anything else starts.
    let server = if config.server.enabled {
        let addr = tls::socket_addr(&config.server).context("cannot start the status server")?;
        let rustls = tls::load(&config.server.tls)
            .await
            .context("cannot start the status server")?;
        Some((addr, rustls))
    } else {
        info!("status server disabled");
        None
    };

    let bridge = AdbBridge::new(
        config.monitor.bridge_program.clone(),
        config.monitor.bridge_timeout(),
    );
    let mut monitor = Monitor::from_config(&config, bridge);

    if config.sleep_monitor.enabled {
        match SleepWatcher::start(&config.sleep_monitor).await {
            Ok(watcher) => monitor = monitor.with_power_source(watcher),
            Err(e) => {
                let e = AdbStatusError::from(e);
                warn!(
                    error = %e,
                    error_code = e.error_code(),
                    "continuing without sleep/wake events"
                );
            }
        }
    }

    let cancel = CancellationToken::new();
    let handle = monitor.handle();
    let monitor_task = tokio::spawn(monitor.run(cancel.clone()));

    let server_task = server.map(|(addr, rustls)| {
        let app = create_router(AppState::new(handle));
        let cancel = cancel.clone();
        let grace = config.monitor.shutdown_grace();
        tokio::spawn(async move {
            let served = tls::serve(addr, rustls, app, Handle::new(), cancel.clone(), grace).await;
            if let Err(e) = served {
                error!(error = %e, "status server stopped unexpectedly");
                cancel.cancel();
            }
        })
    });

    tokio::select! {
        result = wait_for_shutdown_signal() => {
            if let Err(e) = result {
                error!(error = %e, "cannot listen for shutdown signals");
            }
        }
        () = cancel.cancelled() => {}
    }
    info!("shutting down");
    cancel.cancel();

    if let Some(task) = server_task {
        if let Err(e) = task.await {
            error!(error = %e, "status server task failed");
        }
    }
    if let Err(e) = monitor_task.await {
        error!(error = %e, "monitor task failed");
    }

    lock.release();
    info!("adbstatusd stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}

/// The pid of the running daemon, if any. A stale pid file is removed.
#[must_use]
pub fn status(pid_file: &Path) -> Option<u32> {
    running_pid(pid_file)
}

/// Sends SIGTERM to the daemon recorded in `pid_file` and waits up to `wait`
/// for it to exit.
///
/// # Errors
///
/// Returns an error if the daemon is alive but cannot be signalled.
pub fn stop(pid_file: &Path, wait: Duration) -> Result<StopOutcome> {
    let Some(pid) = running_pid(pid_file) else {
        return Ok(StopOutcome::NotRunning);
    };

    if !terminate(pid) {
        if !is_process_alive(pid) {
            return Ok(StopOutcome::Stopped(pid));
        }
        bail!("failed to send SIGTERM to PID {pid}");
    }

    let deadline = std::time::Instant::now() + wait;
    while std::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            return Ok(StopOutcome::Stopped(pid));
        }
        std::thread::sleep(STOP_POLL);
    }
    Ok(StopOutcome::StillRunning(pid))
}
