//! One-shot device listing for `adbstatusd devices`.

use std::fmt::Write as _;

use adbstatus_core::{AdbBridge, AdbStatusError, Config, DeviceRecord, DeviceSource};
use anyhow::{Context, Result};

/// Captures the devices visible right now, optionally only `serial`.
///
/// # Errors
///
/// Returns the device-bridge failure; unlike the daemon there is no next cycle
/// to retry in.
pub async fn capture(config: &Config, serial: Option<&str>) -> Result<Vec<DeviceRecord>> {
    let mut bridge = AdbBridge::new(
        config.monitor.bridge_program.clone(),
        config.monitor.bridge_timeout(),
    );
    if let Some(serial) = serial {
        bridge = bridge.with_serial(serial);
    }
    let snapshot = bridge
        .capture()
        .await
        .map_err(AdbStatusError::from)
        .context("cannot list devices")?;
    Ok(snapshot.to_vec())
}

/// Pretty-printed JSON array, the same records `GET /devices` returns.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_json(devices: &[DeviceRecord]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(devices)
}

/// Human-readable listing: a count header, then each device with its
/// properties indented below it.
#[must_use]
pub fn render_text(devices: &[DeviceRecord]) -> String {
    if devices.is_empty() {
        return "No ADB devices connected\n".to_string();
    }
    let mut out = format!("ADB Devices ({}):\n", devices.len());
    for device in devices {
        let _ = writeln!(out, "  {} - {}", device.serial, device.state);
        for (key, value) in &device.properties {
            let _ = writeln!(out, "    {key}: {value}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbstatus_core::DeviceState;

    fn devices() -> Vec<DeviceRecord> {
        vec![
            DeviceRecord::new("R58M123ABC", DeviceState::Device)
                .with_property("model", "SM_G973F")
                .with_property("transport_id", "3"),
            DeviceRecord::new("emulator-5554", DeviceState::Unauthorized),
        ]
    }

    #[test]
    fn test_text_lists_devices_and_properties() {
        assert_eq!(
            render_text(&devices()),
            "ADB Devices (2):\n\
             \x20 R58M123ABC - device\n\
             \x20   model: SM_G973F\n\
             \x20   transport_id: 3\n\
             \x20 emulator-5554 - unauthorized\n"
        );
    }

    #[test]
    fn test_text_without_devices() {
        assert_eq!(render_text(&[]), "No ADB devices connected\n");
    }

    #[test]
    fn test_json_is_an_indented_array() {
        let json = render_json(&devices()).unwrap();
        assert!(json.starts_with("[\n  {"));
        let parsed: Vec<DeviceRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].property("model"), Some("SM_G973F"));
        assert_eq!(render_json(&[]).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_capture_reports_missing_bridge() {
        let mut config = Config::default();
        config.monitor.bridge_program = "/nonexistent/adbstatus-test-adb".to_string();
        let err = capture(&config, Some("A")).await.unwrap_err();
        assert!(err.to_string().contains("cannot list devices"));
    }
}
