//! Host sleep/wake notifications.
//!
//! The watcher owns an event directory. An external hook (by default
//! `sleepwatcher -s <cmd> -w <cmd>`) touches `sleep_event` or `wake_event` in it
//! when the host suspends or resumes, and a polling task turns those marker
//! files into [`PowerEvent`]s. Anything else that can create a file, such as a
//! systemd sleep hook, can drive the same directory.
//!
//! Hooks tend to fire more than once per physical transition, so identical
//! consecutive events inside the de-duplication window are dropped here.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant, SystemTime};

use tempfile::TempDir;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SleepMonitorConfig;
use crate::device::PowerEvent;
use crate::pidfile::{running_pid, LockError, PidFile};

/// Marker dropped by the hook before the host sleeps.
pub const SLEEP_MARKER: &str = "sleep_event";

/// Marker dropped by the hook after the host wakes.
pub const WAKE_MARKER: &str = "wake_event";

const CHANNEL_CAPACITY: usize = 16;

/// Why the hook could not be started.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook program could not be spawned.
    #[error("cannot start '{program}': {source}")]
    Unavailable {
        /// Hook program.
        program: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// Another hook instance is recorded in the pid file.
    #[error("hook already running with PID {pid}")]
    AlreadyRunning {
        /// The live owner.
        pid: u32,
    },

    /// No hook program and no event directory to watch.
    #[error("no hook program configured and no event directory to watch")]
    NotConfigured,

    /// The event directory could not be prepared.
    #[error("event directory {}: {source}", path.display())]
    EventDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The hook pid file could not be written.
    #[error(transparent)]
    PidFile(#[from] LockError),
}

/// Drops identical consecutive events that arrive within a window.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    window: Duration,
    last: Option<(PowerEvent, Instant)>,
}

impl Deduplicator {
    /// Creates a deduplicator. A zero window accepts everything.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether `event` arriving at `now` should be delivered.
    pub fn accept(&mut self, event: PowerEvent, now: Instant) -> bool {
        if let Some((last, at)) = self.last {
            if last == event && now.saturating_duration_since(at) < self.window {
                return false;
            }
        }
        self.last = Some((event, now));
        true
    }
}

enum EventDir {
    Configured(PathBuf),
    Temporary(TempDir),
}

impl EventDir {
    fn path(&self) -> &Path {
        match self {
            Self::Configured(path) => path,
            Self::Temporary(dir) => dir.path(),
        }
    }
}

/// Source of [`PowerEvent`]s.
pub struct SleepWatcher {
    events: mpsc::Receiver<PowerEvent>,
    dedup: Deduplicator,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    event_dir: Option<EventDir>,
}

impl std::fmt::Debug for SleepWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleepWatcher")
            .field("event_dir", &self.event_dir().map(Path::display))
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl SleepWatcher {
    /// Prepares the event directory, launches the hook and starts watching.
    ///
    /// An empty `program` skips the hook and only watches `event_dir`.
    ///
    /// # Errors
    ///
    /// Returns a [`HookError`] if the hook cannot be launched. Callers are
    /// expected to log it and carry on without sleep/wake events.
    pub async fn start(config: &SleepMonitorConfig) -> Result<Self, HookError> {
        let program = config.program.trim();
        let event_dir = match &config.event_dir {
            Some(path) => {
                tokio::fs::create_dir_all(path)
                    .await
                    .map_err(|source| HookError::EventDir {
                        path: path.clone(),
                        source,
                    })?;
                EventDir::Configured(path.clone())
            }
            None if program.is_empty() => return Err(HookError::NotConfigured),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("adbstatus-power-")
                    .tempdir()
                    .map_err(|source| HookError::EventDir {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                EventDir::Temporary(dir)
            }
        };
        let dir = event_dir.path().to_path_buf();

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        if !program.is_empty() {
            if let Some(pid) = running_pid(&config.pid_file) {
                return Err(HookError::AlreadyRunning { pid });
            }
            let child = spawn_hook(program, &dir)?;
            let Some(pid) = child.id() else {
                return Err(HookError::Unavailable {
                    program: program.to_string(),
                    source: std::io::Error::other("exited immediately"),
                });
            };
            let pid_file = PidFile::acquire_for(&config.pid_file, pid)?;
            info!(program, pid, dir = %dir.display(), "sleep/wake hook started");
            tasks.push(tokio::spawn(supervise_hook(
                child,
                pid_file,
                cancel.clone(),
            )));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tasks.push(tokio::spawn(poll_markers(
            dir,
            config.poll_interval(),
            tx,
            cancel.clone(),
        )));

        Ok(Self {
            events: rx,
            dedup: Deduplicator::new(config.dedup_window()),
            cancel,
            tasks,
            event_dir: Some(event_dir),
        })
    }

    /// A watcher fed by the returned sender instead of a hook.
    #[must_use]
    pub fn channel(dedup_window: Duration) -> (mpsc::Sender<PowerEvent>, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let watcher = Self {
            events: rx,
            dedup: Deduplicator::new(dedup_window),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            event_dir: None,
        };
        (tx, watcher)
    }

    /// The directory the hook writes markers into, if there is one.
    #[must_use]
    pub fn event_dir(&self) -> Option<&Path> {
        self.event_dir.as_ref().map(EventDir::path)
    }

    /// Waits for the next distinct event. Returns `None` once the watcher is
    /// shut down.
    pub async fn next_event(&mut self) -> Option<PowerEvent> {
        loop {
            let event = self.events.recv().await?;
            if self.dedup.accept(event, Instant::now()) {
                info!(%event, "power event");
                return Some(event);
            }
            debug!(%event, "duplicate power event dropped");
        }
    }

    /// Stops the hook and the polling task.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.events.close();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "sleep/wake task ended abnormally");
            }
        }
    }
}

impl Drop for SleepWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_hook(program: &str, dir: &Path) -> Result<Child, HookError> {
    Command::new(program)
        .arg("-s")
        .arg(touch_command(&dir.join(SLEEP_MARKER)))
        .arg("-w")
        .arg(touch_command(&dir.join(WAKE_MARKER)))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| HookError::Unavailable {
            program: program.to_string(),
            source,
        })
}

/// Shell command that creates `path`, single-quoted.
fn touch_command(path: &Path) -> String {
    let quoted = path.display().to_string().replace('\'', r"'\''");
    format!("touch '{quoted}'")
}

async fn supervise_hook(mut child: Child, pid_file: PidFile, cancel: CancellationToken) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => warn!(%status, "sleep/wake hook exited"),
            Err(e) => warn!(error = %e, "lost track of sleep/wake hook"),
        },
        () = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to stop sleep/wake hook");
            }
        }
    }
    drop(pid_file);
}

async fn poll_markers(
    dir: PathBuf,
    every: Duration,
    tx: mpsc::Sender<PowerEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        for event in take_markers(&dir).await {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

/// Removes any marker files in `dir` and returns their events, oldest first.
async fn take_markers(dir: &Path) -> Vec<PowerEvent> {
    let mut found = Vec::new();
    for (name, event) in [(SLEEP_MARKER, PowerEvent::Sleep), (WAKE_MARKER, PowerEvent::Wake)] {
        let path = dir.join(name);
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => found.push((modified, event)),
            Err(e) => warn!(path = %path.display(), error = %e, "cannot consume marker"),
        }
    }
    found.sort_by_key(|(modified, _)| *modified);
    found.into_iter().map(|(_, event)| event).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> SleepMonitorConfig {
        SleepMonitorConfig {
            enabled: true,
            program: String::new(),
            pid_file: dir.join("hook.pid"),
            event_dir: Some(dir.join("events")),
            dedup_window_ms: 5000,
            poll_interval_ms: 20,
        }
    }

    #[test]
    fn test_dedup_window() {
        let mut dedup = Deduplicator::new(Duration::from_secs(5));
        let t0 = Instant::now();
        assert!(dedup.accept(PowerEvent::Sleep, t0));
        assert!(!dedup.accept(PowerEvent::Sleep, t0 + Duration::from_secs(1)));
        assert!(dedup.accept(PowerEvent::Wake, t0 + Duration::from_secs(2)));
        assert!(dedup.accept(PowerEvent::Sleep, t0 + Duration::from_secs(3)));
        assert!(dedup.accept(PowerEvent::Sleep, t0 + Duration::from_secs(9)));
    }

    #[test]
    fn test_zero_window_accepts_repeats() {
        let mut dedup = Deduplicator::new(Duration::ZERO);
        let now = Instant::now();
        assert!(dedup.accept(PowerEvent::Wake, now));
        assert!(dedup.accept(PowerEvent::Wake, now));
    }

    #[test]
    fn test_touch_command_quotes_path() {
        assert_eq!(
            touch_command(Path::new("/tmp/it's here/sleep_event")),
            r"touch '/tmp/it'\''s here/sleep_event'"
        );
    }

    #[tokio::test]
    async fn test_channel_source_dedupes_and_closes() {
        let (tx, mut watcher) = SleepWatcher::channel(Duration::from_secs(5));
        tx.send(PowerEvent::Sleep).await.unwrap();
        tx.send(PowerEvent::Sleep).await.unwrap();
        tx.send(PowerEvent::Wake).await.unwrap();
        drop(tx);

        assert_eq!(watcher.next_event().await, Some(PowerEvent::Sleep));
        assert_eq!(watcher.next_event().await, Some(PowerEvent::Wake));
        assert_eq!(watcher.next_event().await, None);
    }

    #[tokio::test]
    async fn test_marker_files_become_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = SleepWatcher::start(&config(dir.path())).await.unwrap();
        let events = watcher.event_dir().unwrap().to_path_buf();

        tokio::fs::write(events.join(SLEEP_MARKER), b"").await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), watcher.next_event())
            .await
            .unwrap();
        assert_eq!(event, Some(PowerEvent::Sleep));
        assert!(!events.join(SLEEP_MARKER).exists());

        watcher.shutdown().await;
        assert_eq!(watcher.next_event().await, None);
    }

    #[tokio::test]
    async fn test_missing_hook_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.program = "/nonexistent/sleepwatcher".to_string();
        let err = SleepWatcher::start(&cfg).await.unwrap_err();
        assert!(matches!(err, HookError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_live_hook_pid_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.program = "sleep".to_string();
        std::fs::write(&cfg.pid_file, format!("{}\n", std::process::id())).unwrap();
        let err = SleepWatcher::start(&cfg).await.unwrap_err();
        assert!(matches!(err, HookError::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn test_no_program_and_no_dir_is_not_configured() {
        let cfg = SleepMonitorConfig {
            program: String::new(),
            event_dir: None,
            ..SleepMonitorConfig::default()
        };
        assert!(matches!(
            SleepWatcher::start(&cfg).await,
            Err(HookError::NotConfigured)
        ));
    }
}
