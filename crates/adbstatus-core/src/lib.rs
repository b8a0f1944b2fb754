//! # adbstatus-core
//!
//! Core logic for the adbstatus monitor daemon.
//!
//! This crate provides:
//! - Device-bridge invocation and `devices -l` parsing
//! - Snapshot diffing into connect/disconnect events
//! - Host sleep/wake notifications through a marker-file hook
//! - Rule matching and time-bounded action scripts
//! - The monitor loop and the state it publishes to readers
//!
//! ## Architecture
//!
//! - [`device`] - Device records, snapshots and events
//! - [`bridge`] - Snapshot capture from the device-bridge tool
//! - [`tracker`] - Snapshot diffing
//! - [`sleep`] - Sleep/wake event source
//! - [`rules`] - Device filters and action rules
//! - [`action`] - Action script execution
//! - [`dispatch`] - Rule matching and the dispatch queue
//! - [`state`] - Shared monitor state
//! - [`monitor`] - The monitor loop
//! - [`config`] - Configuration loading and validation
//! - [`pidfile`] - Pid-file lock
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Response types shared with the status API

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod action;
pub mod bridge;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod pidfile;
pub mod rules;
pub mod sleep;
pub mod state;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
pub use action::{ActionContext, ActionError, ActionOutput, ActionRunner};
pub use bridge::{parse_devices, AdbBridge, BridgeError, BridgeResult, DeviceSource};
pub use config::{
    Config, ConfigError, DaemonConfig, LoggingConfig, MonitorConfig, ServerConfig,
    SleepMonitorConfig, TlsConfig,
};
pub use device::{DeviceEvent, DeviceRecord, DeviceSnapshot, DeviceState, EventKind, PowerEvent};
pub use dispatch::{DispatchJob, DispatchReport, Dispatcher};
pub use error::{AdbStatusError, Result};
pub use monitor::{FixedSource, Monitor, MonitorSettings};
pub use pidfile::{LockError, PidFile};
pub use rules::{ActionRule, DeviceFilter, RuleSet};
pub use sleep::{Deduplicator, HookError, SleepWatcher};
pub use state::{MonitorPhase, MonitorState, PowerTransition, StateHandle};
pub use tracker::{diff, DeviceTracker};
pub use types::{HealthResponse, StatusResponse};
