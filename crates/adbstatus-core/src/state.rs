//! Process-wide monitor state.
//!
//! [`MonitorState`] is owned by the monitor loop and is the only writer.
//! Everything else (the status server, the sleep/wake dispatch path) holds a
//! [`StateHandle`], which reads through `watch` receivers: a reader always sees
//! a whole snapshot, never a half-updated one.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::device::{DeviceSnapshot, PowerEvent};

/// Lifecycle of the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    /// Not running.
    Stopped,
    /// Seeding the initial snapshot.
    Starting,
    /// Polling and dispatching.
    Running,
    /// Draining after a shutdown request.
    Stopping,
}

impl fmt::Display for MonitorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// The most recent sleep/wake notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PowerTransition {
    /// Which transition.
    pub event: PowerEvent,
    /// When the daemon received it.
    pub at: DateTime<Utc>,
}

/// Writer side of the shared state.
#[derive(Debug)]
pub struct MonitorState {
    snapshot: watch::Sender<Arc<DeviceSnapshot>>,
    phase: watch::Sender<MonitorPhase>,
    power: watch::Sender<Option<PowerTransition>>,
}

impl MonitorState {
    /// Creates state with an empty snapshot in phase `Stopped`.
    #[must_use]
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(DeviceSnapshot::empty()));
        let (phase, _) = watch::channel(MonitorPhase::Stopped);
        let (power, _) = watch::channel(None);
        Self {
            snapshot,
            phase,
            power,
        }
    }

    /// Returns a read-only handle.
    #[must_use]
    pub fn handle(&self) -> StateHandle {
        StateHandle {
            snapshot: self.snapshot.subscribe(),
            phase: self.phase.subscribe(),
            power: self.power.subscribe(),
        }
    }

    /// Swaps in a new snapshot.
    pub fn publish(&self, snapshot: Arc<DeviceSnapshot>) {
        self.snapshot.send_replace(snapshot);
    }

    /// Moves to a new lifecycle phase.
    pub fn set_phase(&self, phase: MonitorPhase) {
        self.phase.send_replace(phase);
    }

    /// Records a sleep/wake notification received now.
    pub fn record_power(&self, event: PowerEvent) -> PowerTransition {
        let transition = PowerTransition {
            event,
            at: Utc::now(),
        };
        self.power.send_replace(Some(transition));
        transition
    }

    /// The currently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of [`MonitorState`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StateHandle {
    snapshot: watch::Receiver<Arc<DeviceSnapshot>>,
    phase: watch::Receiver<MonitorPhase>,
    power: watch::Receiver<Option<PowerTransition>>,
}

impl StateHandle {
    /// The latest snapshot. The returned `Arc` stays valid after newer swaps.
    #[must_use]
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        Arc::clone(&self.snapshot.borrow())
    }

    /// The current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> MonitorPhase {
        *self.phase.borrow()
    }

    /// The last sleep/wake notification, if any.
    #[must_use]
    pub fn last_power_event(&self) -> Option<PowerTransition> {
        *self.power.borrow()
    }

    /// Waits until the monitor reaches `phase`, or its state is dropped.
    pub async fn wait_for_phase(&mut self, phase: MonitorPhase) -> bool {
        self.phase.wait_for(|p| *p == phase).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRecord, DeviceState};

    #[test]
    fn test_handle_sees_published_snapshot() {
        let state = MonitorState::new();
        let handle = state.handle();
        assert!(handle.snapshot().is_empty());

        let snapshot = DeviceSnapshot::from_records([DeviceRecord::new("A", DeviceState::Device)]);
        state.publish(Arc::new(snapshot));
        assert!(handle.snapshot().contains("A"));
    }

    #[test]
    fn test_old_snapshot_survives_swap() {
        let state = MonitorState::new();
        let handle = state.handle();
        let before = handle.snapshot();
        state.publish(Arc::new(DeviceSnapshot::from_records([DeviceRecord::new(
            "A",
            DeviceState::Device,
        )])));
        assert!(before.is_empty());
        assert_eq!(handle.snapshot().len(), 1);
    }

    #[test]
    fn test_phase_and_power_tracking() {
        let state = MonitorState::new();
        let handle = state.handle();
        assert_eq!(handle.phase(), MonitorPhase::Stopped);
        assert!(handle.last_power_event().is_none());

        state.set_phase(MonitorPhase::Running);
        let transition = state.record_power(PowerEvent::Sleep);
        assert_eq!(handle.phase(), MonitorPhase::Running);
        assert_eq!(handle.last_power_event(), Some(transition));
    }

    #[tokio::test]
    async fn test_wait_for_phase() {
        let state = MonitorState::new();
        let mut handle = state.handle();
        let waiter = tokio::spawn(async move { handle.wait_for_phase(MonitorPhase::Running).await });
        state.set_phase(MonitorPhase::Starting);
        state.set_phase(MonitorPhase::Running);
        assert!(waiter.await.unwrap());
    }
}
