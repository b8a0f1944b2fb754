//! Unified error types for the adbstatus core library.
//!
//! This module provides a unified error type [`AdbStatusError`] that covers all failure
//! modes across the adbstatus daemon. Each module also has its own specific error type
//! ([`BridgeError`], [`HookError`], [`ActionError`], [`ConfigError`], [`LockError`]) for
//! internal use.
//!
//! # Failure classes
//!
//! These are handled where they occur rather than by inspecting the error:
//!
//! - Device-bridge failures skip one poll cycle.
//! - An unavailable sleep/wake hook leaves the daemon running without
//!   sleep/wake events.
//! - Action script failures are logged per invocation.
//! - Invalid configuration or a held pid-file lock stop startup.
//!
//! # Example
//!
//! ```rust
//! use adbstatus_core::error::{AdbStatusError, Result};
//!
//! fn require_lock(held_by: Option<u32>) -> Result<()> {
//!     if let Some(pid) = held_by {
//!         return Err(AdbStatusError::LockHeld(pid));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

pub use crate::action::ActionError;
pub use crate::bridge::BridgeError;
pub use crate::config::ConfigError;
pub use crate::pidfile::LockError;
pub use crate::sleep::HookError;

/// The unified error type for all adbstatus operations.
#[derive(Debug, Error)]
pub enum AdbStatusError {
    // =========================================================================
    // DEVICE-BRIDGE ERRORS
    // =========================================================================
    /// The device-bridge executable could not be invoked.
    #[error("Device bridge unavailable: {0}. Ensure adb is installed and on PATH.")]
    ToolUnavailable(String),

    /// The device-bridge exited non-zero.
    #[error("Device bridge failed: {0}")]
    ToolError(String),

    /// The device-bridge output did not match the expected tabular format.
    #[error("Could not parse device list: {0}")]
    ParseError(String),

    // =========================================================================
    // SLEEP/WAKE HOOK ERRORS
    // =========================================================================
    /// The sleep/wake hook could not be started.
    #[error("Sleep/wake hook unavailable: {0}")]
    HookUnavailable(String),

    // =========================================================================
    // ACTION ERRORS
    // =========================================================================
    /// An action script exited non-zero or could not be spawned.
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// An action script exceeded its time budget and was killed.
    #[error("Action timed out after {0} seconds")]
    ActionTimedOut(u64),

    // =========================================================================
    // STARTUP ERRORS
    // =========================================================================
    /// The configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Another daemon instance holds the pid-file lock.
    #[error("Daemon already running with PID {0}")]
    LockHeld(u32),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for adbstatus operations.
pub type Result<T> = std::result::Result<T, AdbStatusError>;

impl AdbStatusError {
    /// Returns a machine-readable error code for structured logs.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ToolUnavailable(_) => "TOOL_UNAVAILABLE",
            Self::ToolError(_) => "TOOL_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::HookUnavailable(_) => "HOOK_UNAVAILABLE",
            Self::ActionFailed(_) => "ACTION_FAILED",
            Self::ActionTimedOut(_) => "ACTION_TIMED_OUT",
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
            Self::LockHeld(_) => "LOCK_HELD",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<BridgeError> for AdbStatusError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::ToolUnavailable { .. } => Self::ToolUnavailable(err.to_string()),
            BridgeError::ToolError { .. } | BridgeError::ToolTimedOut { .. } => {
                Self::ToolError(err.to_string())
            }
            BridgeError::ParseError { .. } => Self::ParseError(err.to_string()),
        }
    }
}

impl From<HookError> for AdbStatusError {
    fn from(err: HookError) -> Self {
        Self::HookUnavailable(err.to_string())
    }
}

impl From<ActionError> for AdbStatusError {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::TimedOut { timeout_secs } => Self::ActionTimedOut(timeout_secs),
            ActionError::Failed { .. } | ActionError::SpawnFailed { .. } => {
                Self::ActionFailed(err.to_string())
            }
        }
    }
}

impl From<ConfigError> for AdbStatusError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigInvalid(messages.join("; "))
            }
            other => Self::ConfigInvalid(other.to_string()),
        }
    }
}

impl From<LockError> for AdbStatusError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Held { pid } => Self::LockHeld(pid),
            LockError::Io { source, .. } => Self::IoError(source),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
