//! Action script execution.
//!
//! Scripts are opaque shell text. Each run spawns `<shell> -c <script>` with the
//! device's identity and properties in the environment, captures its output and
//! kills it if it outlives the configured timeout.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

use crate::device::{DeviceRecord, EventKind};

/// Errors from a single script run.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The script exited non-zero or was killed by a signal.
    #[error("script exited with {status}: {stderr}")]
    Failed {
        /// Exit status description.
        status: String,
        /// Trimmed stderr.
        stderr: String,
    },

    /// The script outlived its budget and was killed.
    #[error("script timed out after {timeout_secs} seconds")]
    TimedOut {
        /// Budget that elapsed.
        timeout_secs: u64,
    },

    /// The shell could not be started.
    #[error("cannot spawn '{shell}': {source}")]
    SpawnFailed {
        /// Shell that was invoked.
        shell: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },
}

/// Output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutput {
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

/// What a script runs for: the device, the event and the rule that selected it.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    /// Device the script runs for.
    pub device: &'a DeviceRecord,
    /// Event being handled.
    pub kind: EventKind,
    /// Label of the rule.
    pub rule: &'a str,
}

impl ActionContext<'_> {
    /// Environment variables passed to the script.
    #[must_use]
    pub fn env(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("ANDROID_SERIAL".to_string(), self.device.serial.clone()),
            ("ADBSTATUS_SERIAL".to_string(), self.device.serial.clone()),
            ("ADBSTATUS_STATE".to_string(), self.device.state.to_string()),
            ("ADBSTATUS_EVENT".to_string(), self.kind.to_string()),
            ("ADBSTATUS_RULE".to_string(), self.rule.to_string()),
        ];
        vars.extend(
            self.device
                .properties
                .iter()
                .map(|(key, value)| (property_var(key), value.clone())),
        );
        vars
    }
}

/// `ADBSTATUS_PROP_<KEY>` with the key upper-cased and non-alphanumerics as `_`.
#[must_use]
pub fn property_var(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("ADBSTATUS_PROP_{}", sanitized.to_ascii_uppercase())
}

/// Runs scripts through a shell with a timeout.
#[derive(Debug, Clone)]
pub struct ActionRunner {
    shell: String,
    timeout: Duration,
}

impl ActionRunner {
    /// Creates a runner.
    pub fn new(shell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
        }
    }

    /// The per-script budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs one script to completion, or kills it at the timeout.
    ///
    /// # Errors
    ///
    /// [`ActionError::SpawnFailed`] if the shell cannot start,
    /// [`ActionError::TimedOut`] if the budget elapses,
    /// [`ActionError::Failed`] on a non-zero exit.
    pub async fn run(
        &self,
        script: &str,
        context: &ActionContext<'_>,
    ) -> Result<ActionOutput, ActionError> {
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .envs(context.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ActionError::SpawnFailed {
                shell: self.shell.clone(),
                source,
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(ActionError::SpawnFailed {
                    shell: self.shell.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ActionError::TimedOut {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(ActionOutput { stdout, stderr })
        } else {
            Err(ActionError::Failed {
                status: output.status.to_string(),
                stderr,
            })
        }
    }
}
