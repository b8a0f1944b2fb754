//! Device records, snapshots and the events derived from them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Connection state reported by the device bridge.
///
/// `Absent` is never printed by the bridge. It marks the last-known record of a
/// device that has disappeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Connected and authorized.
    Device,
    /// Connected but the host key has not been accepted on the device.
    Unauthorized,
    /// Known to the bridge but not responding.
    Offline,
    /// No longer visible to the bridge.
    Absent,
    /// Booted into recovery.
    Recovery,
    /// Waiting for a sideload.
    Sideload,
    /// In the bootloader.
    Bootloader,
    /// Authorization in progress.
    Authorizing,
    /// Transport is still being established.
    Connecting,
    /// Host-side transport entry.
    Host,
    /// Rescue mode.
    Rescue,
    /// The host user lacks permission to access the USB device.
    NoPermissions,
}

impl DeviceState {
    /// Returns the wire name used by the bridge and the JSON API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Unauthorized => "unauthorized",
            Self::Offline => "offline",
            Self::Absent => "absent",
            Self::Recovery => "recovery",
            Self::Sideload => "sideload",
            Self::Bootloader => "bootloader",
            Self::Authorizing => "authorizing",
            Self::Connecting => "connecting",
            Self::Host => "host",
            Self::Rescue => "rescue",
            Self::NoPermissions => "no_permissions",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a state token is not one the bridge is known to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl fmt::Display for UnknownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown device state '{}'", self.0)
    }
}

impl std::error::Error for UnknownState {}

impl FromStr for DeviceState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(Self::Device),
            "unauthorized" => Ok(Self::Unauthorized),
            "offline" => Ok(Self::Offline),
            "recovery" => Ok(Self::Recovery),
            "sideload" => Ok(Self::Sideload),
            "bootloader" => Ok(Self::Bootloader),
            "authorizing" => Ok(Self::Authorizing),
            "connecting" => Ok(Self::Connecting),
            "host" => Ok(Self::Host),
            "rescue" => Ok(Self::Rescue),
            "no_permissions" | "no permissions" => Ok(Self::NoPermissions),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A single device as seen by the bridge.
///
/// Identity is the serial: two records with the same serial are the same device,
/// whatever their state or properties.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "serial": "R58M123ABC",
    "state": "device",
    "properties": {
        "model": "SM_G973F",
        "product": "beyond1lteeea",
        "transport_id": "3"
    }
}))]
pub struct DeviceRecord {
    /// Unique device serial.
    #[schema(example = "R58M123ABC")]
    pub serial: String,

    /// Connection state.
    pub state: DeviceState,

    /// Named properties such as `model`, `product` and `transport_id`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl DeviceRecord {
    /// Creates a record with no properties.
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        Self {
            serial: serial.into(),
            state,
            properties: BTreeMap::new(),
        }
    }

    /// Adds a property, returning the updated record.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Looks up a field by name.
    ///
    /// `serial` and `state` resolve to the record's own fields; every other key is
    /// looked up in the property map.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        match key {
            "serial" => Some(&self.serial),
            "state" => Some(self.state.as_str()),
            _ => self.properties.get(key).map(String::as_str),
        }
    }

    /// Returns a copy of this record marked as no longer visible.
    #[must_use]
    pub fn into_absent(mut self) -> Self {
        self.state = DeviceState::Absent;
        self
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl Eq for DeviceRecord {}

/// The set of devices visible at one point in time.
///
/// Records are keyed by serial, so a serial appears at most once and iteration
/// is in ascending serial order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    devices: BTreeMap<String, DeviceRecord>,
    captured_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// An empty snapshot captured now.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            devices: BTreeMap::new(),
            captured_at: Utc::now(),
        }
    }

    /// Builds a snapshot from records. A later record with a repeated serial
    /// replaces the earlier one.
    pub fn from_records(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let devices = records
            .into_iter()
            .map(|record| (record.serial.clone(), record))
            .collect();
        Self {
            devices,
            captured_at: Utc::now(),
        }
    }

    /// When the snapshot was captured.
    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Looks up a device by serial.
    #[must_use]
    pub fn get(&self, serial: &str) -> Option<&DeviceRecord> {
        self.devices.get(serial)
    }

    /// Whether a serial is present.
    #[must_use]
    pub fn contains(&self, serial: &str) -> bool {
        self.devices.contains_key(serial)
    }

    /// Records in ascending serial order.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    /// Serials in ascending order.
    pub fn serials(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether no devices are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Copies the records out in ascending serial order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<DeviceRecord> {
        self.devices.values().cloned().collect()
    }
}

impl Default for DeviceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

/// A host power transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PowerEvent {
    /// The host is about to suspend.
    Sleep,
    /// The host has resumed.
    Wake,
}

impl PowerEvent {
    /// The event kind this transition dispatches as.
    #[must_use]
    pub const fn kind(self) -> EventKind {
        match self {
            Self::Sleep => EventKind::Sleep,
            Self::Wake => EventKind::Wake,
        }
    }
}

impl fmt::Display for PowerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// Something the monitor reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A serial appeared.
    Connect(DeviceRecord),
    /// A serial disappeared. Carries the last-known record with state `absent`.
    Disconnect(DeviceRecord),
    /// The host is suspending.
    Sleep,
    /// The host resumed.
    Wake,
}

impl DeviceEvent {
    /// The kind used to select a rule's script.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connect(_) => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Sleep => EventKind::Sleep,
            Self::Wake => EventKind::Wake,
        }
    }

    /// The device the event is about, for connect/disconnect events.
    #[must_use]
    pub const fn device(&self) -> Option<&DeviceRecord> {
        match self {
            Self::Connect(record) | Self::Disconnect(record) => Some(record),
            Self::Sleep | Self::Wake => None,
        }
    }
}

impl From<PowerEvent> for DeviceEvent {
    fn from(event: PowerEvent) -> Self {
        match event {
            PowerEvent::Sleep => Self::Sleep,
            PowerEvent::Wake => Self::Wake,
        }
    }
}

/// The four kinds of event a rule can carry a script for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Device connected.
    Connect,
    /// Device disconnected.
    Disconnect,
    /// Host sleeping.
    Sleep,
    /// Host waking.
    Wake,
}

impl EventKind {
    /// Lowercase name, also exported to scripts as `ADBSTATUS_EVENT`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Sleep => "sleep",
            Self::Wake => "wake",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
