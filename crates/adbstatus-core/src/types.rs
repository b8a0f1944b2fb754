//! Response types shared between the monitor and the status API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::{MonitorPhase, PowerTransition, StateHandle};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    /// A healthy response for this build.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Monitor status summary.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    /// Current lifecycle phase of the monitor loop.
    pub phase: MonitorPhase,

    /// Devices in the current snapshot.
    #[schema(example = 2)]
    pub device_count: usize,

    /// When the current snapshot was captured.
    pub snapshot_at: DateTime<Utc>,

    /// Most recent sleep/wake notification, if any.
    pub last_power_event: Option<PowerTransition>,

    /// Seconds since the daemon started.
    #[schema(example = 3600)]
    pub uptime_secs: i64,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl StatusResponse {
    /// Builds a summary from the published state.
    #[must_use]
    pub fn from_state(state: &StateHandle, started_at: DateTime<Utc>) -> Self {
        let snapshot = state.snapshot();
        Self {
            phase: state.phase(),
            device_count: snapshot.len(),
            snapshot_at: snapshot.captured_at(),
            last_power_event: state.last_power_event(),
            uptime_secs: (Utc::now() - started_at).num_seconds().max(0),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MonitorState;

    #[test]
    fn test_status_from_fresh_state() {
        let state = MonitorState::new();
        let status = StatusResponse::from_state(&state.handle(), Utc::now());
        assert_eq!(status.phase, MonitorPhase::Stopped);
        assert_eq!(status.device_count, 0);
        assert!(status.last_power_event.is_none());
        assert!(status.uptime_secs >= 0);
    }

    #[test]
    fn test_health_ok() {
        let health = HealthResponse::ok();
        assert_eq!(health.status, "ok");
        assert!(!health.version.is_empty());
    }
}
