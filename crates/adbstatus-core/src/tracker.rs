//! Snapshot diffing.
//!
//! Membership changes produce events. A device that stays present but changes
//! state or properties produces no event: the new record simply replaces the old
//! one in the published snapshot.

use std::sync::Arc;

use crate::device::{DeviceEvent, DeviceSnapshot};

/// Computes the events that turn `previous` into `current`.
///
/// Connect events come first in ascending serial order, then Disconnect events in
/// ascending serial order. Disconnect events carry the record from `previous`
/// with its state set to `absent`.
#[must_use]
pub fn diff(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> Vec<DeviceEvent> {
    let connects = current
        .devices()
        .filter(|device| !previous.contains(&device.serial))
        .map(|device| DeviceEvent::Connect(device.clone()));

    let disconnects = previous
        .devices()
        .filter(|device| !current.contains(&device.serial))
        .map(|device| DeviceEvent::Disconnect(device.clone().into_absent()));

    connects.chain(disconnects).collect()
}

/// Holds the authoritative snapshot and turns new captures into events.
#[derive(Debug)]
pub struct DeviceTracker {
    current: Arc<DeviceSnapshot>,
    seeded: bool,
    connect_on_startup: bool,
}

impl DeviceTracker {
    /// Creates an unseeded tracker.
    ///
    /// With `connect_on_startup` the first capture is diffed against an empty
    /// baseline, so devices already attached at startup fire Connect events.
    /// Without it the first capture only seeds the baseline.
    #[must_use]
    pub fn new(connect_on_startup: bool) -> Self {
        Self {
            current: Arc::new(DeviceSnapshot::empty()),
            seeded: false,
            connect_on_startup,
        }
    }

    /// Whether a capture has been accepted yet.
    #[must_use]
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// The snapshot readers should see.
    #[must_use]
    pub fn current(&self) -> Arc<DeviceSnapshot> {
        Arc::clone(&self.current)
    }

    /// Replaces the current snapshot and returns the resulting events.
    pub fn update(&mut self, snapshot: DeviceSnapshot) -> Vec<DeviceEvent> {
        let events = if self.seeded || self.connect_on_startup {
            diff(&self.current, &snapshot)
        } else {
            Vec::new()
        };
        self.seeded = true;
        self.current = Arc::new(snapshot);
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRecord, DeviceState};

    fn snapshot(serials: &[&str]) -> DeviceSnapshot {
        DeviceSnapshot::from_records(
            serials
                .iter()
                .map(|s| DeviceRecord::new(*s, DeviceState::Device)),
        )
    }

    fn describe(events: &[DeviceEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                DeviceEvent::Connect(d) => format!("+{}", d.serial),
                DeviceEvent::Disconnect(d) => format!("-{}", d.serial),
                DeviceEvent::Sleep => "sleep".to_string(),
                DeviceEvent::Wake => "wake".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_diff_same_snapshot_is_empty() {
        let s = snapshot(&["A", "B"]);
        assert!(diff(&s, &s).is_empty());
    }

    #[test]
    fn test_diff_connects_then_disconnects_sorted() {
        let prev = snapshot(&["A", "C", "E"]);
        let cur = snapshot(&["D", "B", "C"]);
        assert_eq!(describe(&diff(&prev, &cur)), vec!["+B", "+D", "-A", "-E"]);
    }

    #[test]
    fn test_diff_ignores_state_changes() {
        let prev = snapshot(&["A"]);
        let cur = DeviceSnapshot::from_records([
            DeviceRecord::new("A", DeviceState::Offline).with_property("model", "x")
        ]);
        assert!(diff(&prev, &cur).is_empty());
    }

    #[test]
    fn test_disconnect_carries_last_known_record() {
        let prev = DeviceSnapshot::from_records([
            DeviceRecord::new("A", DeviceState::Device).with_property("model", "Pixel_7")
        ]);
        let events = diff(&prev, &DeviceSnapshot::empty());
        match &events[..] {
            [DeviceEvent::Disconnect(record)] => {
                assert_eq!(record.state, DeviceState::Absent);
                assert_eq!(record.property("model"), Some("Pixel_7"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_diff_counts_match_set_differences() {
        let cases: [(&[&str], &[&str]); 4] = [
            (&[], &["A", "B"]),
            (&["A", "B"], &[]),
            (&["A", "B", "C"], &["B", "C", "D"]),
            (&["X"], &["X"]),
        ];
        for (prev, cur) in cases {
            let events = diff(&snapshot(prev), &snapshot(cur));
            let connects = cur.iter().filter(|s| !prev.contains(s)).count();
            let disconnects = prev.iter().filter(|s| !cur.contains(s)).count();
            let got_connects = events
                .iter()
                .filter(|e| matches!(e, DeviceEvent::Connect(_)))
                .count();
            assert_eq!(got_connects, connects);
            assert_eq!(events.len() - got_connects, disconnects);
        }
    }

    #[test]
    fn test_first_update_seeds_without_events() {
        let mut tracker = DeviceTracker::new(false);
        assert!(!tracker.is_seeded());
        assert!(tracker.update(snapshot(&["A"])).is_empty());
        assert!(tracker.is_seeded());
        assert_eq!(describe(&tracker.update(snapshot(&["A", "B"]))), vec!["+B"]);
    }

    #[test]
    fn test_connect_on_startup_replays_present_devices() {
        let mut tracker = DeviceTracker::new(true);
        assert_eq!(describe(&tracker.update(snapshot(&["A"]))), vec!["+A"]);
    }

    #[test]
    fn test_poll_sequence_scenario() {
        let mut tracker = DeviceTracker::new(false);
        assert!(tracker.update(snapshot(&[])).is_empty());
        assert_eq!(describe(&tracker.update(snapshot(&["A"]))), vec!["+A"]);
        assert_eq!(describe(&tracker.update(snapshot(&["A", "B"]))), vec!["+B"]);
        assert_eq!(describe(&tracker.update(snapshot(&["B"]))), vec!["-A"]);
        assert_eq!(tracker.current().serials().collect::<Vec<_>>(), vec!["B"]);
    }
}
