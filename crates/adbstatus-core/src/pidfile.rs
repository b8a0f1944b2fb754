//! Pid-file lock.
//!
//! A [`PidFile`] records the owning process and is held for the whole time the
//! daemon runs. Dropping it removes the file, exactly once.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;

use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from acquiring a pid file.
#[derive(Debug, Error)]
pub enum LockError {
    /// A live process already owns the file.
    #[error("already running with PID {pid}")]
    Held {
        /// Owner.
        pid: u32,
    },

    /// The file could not be created, read or removed.
    #[error("pid file {}: {source}", path.display())]
    Io {
        /// Pid file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// An acquired pid file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl PidFile {
    /// Writes the current process id to `path`.
    ///
    /// A file left behind by a process that is no longer alive is replaced.
    ///
    /// # Errors
    ///
    /// [`LockError::Held`] if a live process owns the file, [`LockError::Io`]
    /// if it cannot be written.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        Self::acquire_for(path, process::id())
    }

    /// Writes `pid` to `path`. Used to record child processes such as the
    /// sleep/wake hook.
    ///
    /// # Errors
    ///
    /// Same as [`PidFile::acquire`].
    pub fn acquire_for(path: impl Into<PathBuf>, pid: u32) -> Result<Self, LockError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(&path, source))?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{pid}").map_err(|source| io_error(&path, source))?;
                    debug!(path = %path.display(), pid, "pid file written");
                    return Ok(Self {
                        path,
                        pid,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(owner) = read_pid(&path) {
                        if is_process_alive(owner) {
                            return Err(LockError::Held { pid: owner });
                        }
                    }
                    warn!(path = %path.display(), "removing stale pid file");
                    remove_if_exists(&path).map_err(|source| io_error(&path, source))?;
                }
                Err(source) => return Err(io_error(&path, source)),
            }
        }

        Err(io_error(
            &path,
            std::io::Error::new(ErrorKind::AlreadyExists, "pid file keeps reappearing"),
        ))
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded pid.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Removes the file if it still records our pid. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if read_pid(&self.path) == Some(self.pid) {
            match remove_if_exists(&self.path) {
                Ok(()) => info!(path = %self.path.display(), "pid file released"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove pid file"),
            }
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Reads the pid recorded in `path`, if any.
#[must_use]
pub fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

/// Whether a process with this pid exists.
#[must_use]
pub fn is_process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// The pid in `path` if that process is alive. A stale file is removed.
#[must_use]
pub fn running_pid(path: &Path) -> Option<u32> {
    let pid = read_pid(path)?;
    if is_process_alive(pid) {
        Some(pid)
    } else {
        discard_stale(path);
        None
    }
}

/// Removes a pid file whose owner is gone. Returns `false` if it is still there.
fn discard_stale(path: &Path) -> bool {
    match remove_if_exists(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale pid file");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot remove stale pid file");
            false
        }
    }
}

/// Sends SIGTERM to `pid`. Returns `false` if the process is gone or the
/// signal could not be delivered.
#[must_use]
pub fn terminate(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .and_then(|p| p.kill_with(Signal::Term))
        .unwrap_or(false)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}
