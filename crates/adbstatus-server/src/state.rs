//! Application state shared across handlers.

use adbstatus_core::StateHandle;
use chrono::{DateTime, Utc};

/// Read-only view of the monitor, cloned into every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The monitor's published state.
    pub devices: StateHandle,
    /// When the daemon started.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wraps a monitor handle, stamping the start time as now.
    #[must_use]
    pub fn new(devices: StateHandle) -> Self {
        Self {
            devices,
            started_at: Utc::now(),
        }
    }
}
