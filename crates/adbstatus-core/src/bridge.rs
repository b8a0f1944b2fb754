//! Device-bridge invocation and `devices -l` output parsing.
//!
//! The bridge is treated as an opaque external program. Each capture spawns one
//! short-lived `adb devices -l` process, bounded by a timeout, and parses its
//! tabular stdout into a [`DeviceSnapshot`].

use std::future::Future;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::device::{DeviceRecord, DeviceSnapshot, DeviceState};

/// Header printed by the bridge before the device table.
const LIST_HEADER: &str = "List of devices attached";

/// Errors from capturing a snapshot.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The bridge executable could not be started.
    #[error("cannot run '{program}': {source}")]
    ToolUnavailable {
        /// Program that was invoked.
        program: String,
        /// Underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The bridge exited non-zero.
    #[error("'{program}' exited with {status}: {stderr}")]
    ToolError {
        /// Program that was invoked.
        program: String,
        /// Exit status description.
        status: String,
        /// Trimmed stderr.
        stderr: String,
    },

    /// The bridge did not finish within the capture timeout.
    #[error("device bridge did not answer within {timeout_secs} seconds")]
    ToolTimedOut {
        /// Timeout that elapsed.
        timeout_secs: u64,
    },

    /// Output did not match the expected table.
    #[error("unexpected line '{line}': {reason}")]
    ParseError {
        /// Offending line.
        line: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Anything that can produce the current set of devices.
///
/// [`AdbBridge`] is the production implementation. Tests substitute scripted
/// sources.
pub trait DeviceSource: Send + Sync + 'static {
    /// Captures the devices visible right now.
    fn capture(&self) -> impl Future<Output = BridgeResult<DeviceSnapshot>> + Send;
}

/// Reads devices by running `<program> devices -l`.
#[derive(Debug, Clone)]
pub struct AdbBridge {
    program: String,
    timeout: Duration,
    serial: Option<String>,
}

impl AdbBridge {
    /// Creates a reader for the given program with a per-call timeout.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            serial: None,
        }
    }

    /// Restricts captures to one serial, also exported as `ANDROID_SERIAL`.
    #[must_use]
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    /// The program this reader invokes.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self) -> BridgeResult<String> {
        let mut command = Command::new(&self.program);
        if let Some(serial) = &self.serial {
            command.env("ANDROID_SERIAL", serial);
        }
        let child = command
            .args(["devices", "-l"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::ToolUnavailable {
                program: self.program.clone(),
                source,
            })?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(BridgeError::ToolUnavailable {
                    program: self.program.clone(),
                    source,
                })
            }
            // Dropping the wait future drops the child, which kills it.
            Err(_) => {
                return Err(BridgeError::ToolTimedOut {
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(BridgeError::ToolError {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl DeviceSource for AdbBridge {
    async fn capture(&self) -> BridgeResult<DeviceSnapshot> {
        let stdout = self.run().await?;
        trace!(bytes = stdout.len(), "device bridge output received");
        let mut records = parse_devices(&stdout)?;
        if let Some(serial) = &self.serial {
            records.retain(|record| &record.serial == serial);
        }
        debug!(count = records.len(), "captured device snapshot");
        Ok(DeviceSnapshot::from_records(records))
    }
}

/// Returns `true` for spawn errors that mean the tool is missing or not executable.
#[must_use]
pub fn is_missing_tool(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied)
}

/// Parses `devices -l` output into records, in output order.
///
/// Blank lines, the table header and `*`-prefixed daemon messages are skipped.
/// Empty output is zero devices.
///
/// # Errors
///
/// Returns [`BridgeError::ParseError`] for a line without a state, an unknown
/// state, or a serial listed twice.
pub fn parse_devices(output: &str) -> BridgeResult<Vec<DeviceRecord>> {
    let mut records: Vec<DeviceRecord> = Vec::new();

    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('*') || line == LIST_HEADER {
            continue;
        }

        let record = parse_line(line)?;
        if records.iter().any(|r| r.serial == record.serial) {
            return Err(parse_error(line, "serial listed twice"));
        }
        records.push(record);
    }

    Ok(records)
}

fn parse_line(line: &str) -> BridgeResult<DeviceRecord> {
    let mut tokens = line.split_whitespace();
    let serial = tokens
        .next()
        .ok_or_else(|| parse_error(line, "missing serial"))?;
    let state_token = tokens
        .next()
        .ok_or_else(|| parse_error(line, "missing state"))?;

    // "no permissions" is two words followed by free-form advice, which the
    // property filter below skips.
    let state = if state_token == "no" {
        if tokens.next() != Some("permissions") {
            return Err(parse_error(line, "unknown device state 'no'"));
        }
        DeviceState::NoPermissions
    } else {
        state_token
            .parse::<DeviceState>()
            .map_err(|e| parse_error(line, &e.to_string()))?
    };

    let mut record = DeviceRecord::new(serial, state);
    for token in tokens {
        if let Some((key, value)) = token.split_once(':') {
            if is_property_key(key) {
                record.properties.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(record)
}

fn is_property_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_error(line: &str, reason: &str) -> BridgeError {
    BridgeError::ParseError {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}
