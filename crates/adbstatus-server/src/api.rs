//! HTTP API routes and handlers.
//!
//! - `devices` - Devices in the current snapshot
//! - `health` - Health check and monitor status
//! - `error` - API error types and JSON fallbacks
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the API router.
///
/// # Route Structure
///
/// ```text
/// /devices            - Devices in the current snapshot (query filters)
/// /devices/{serial}   - One device
/// /health             - Health check
/// /status             - Monitor status
/// /openapi.json       - OpenAPI specification
/// ```
///
/// Anything else answers with a JSON 404, and a known path with the wrong
/// method answers with a JSON 405.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(devices::router())
        .merge(health::router())
        .route("/openapi.json", get(openapi::get_openapi_spec))
        .fallback(error::not_found)
        .method_not_allowed_fallback(error::method_not_allowed)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbstatus_core::{
        DeviceRecord, DeviceSnapshot, DeviceState, MonitorPhase, MonitorState, PowerEvent,
        StatusResponse,
    };
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use std::sync::Arc;

    fn server_with(records: Vec<DeviceRecord>) -> (MonitorState, TestServer) {
        let monitor = MonitorState::new();
        monitor.publish(Arc::new(DeviceSnapshot::from_records(records)));
        let app = create_router(AppState::new(monitor.handle()));
        (monitor, TestServer::new(app).unwrap())
    }

    fn pixel() -> DeviceRecord {
        DeviceRecord::new("R58M123ABC", DeviceState::Device)
            .with_property("model", "Pixel_7")
            .with_property("transport_id", "3")
    }

    fn emulator() -> DeviceRecord {
        DeviceRecord::new("emulator-5554", DeviceState::Unauthorized)
            .with_property("transport_id", "1")
    }

    #[tokio::test]
    async fn test_no_devices_is_empty_array() {
        let (_monitor, server) = server_with(Vec::new());
        let response = server.get("/devices").await;
        response.assert_status_ok();
        response.assert_json(&serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_list_devices_in_serial_order() {
        let (_monitor, server) = server_with(vec![emulator(), pixel()]);
        let devices: Vec<DeviceRecord> = server.get("/devices").await.json();
        let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(serials, vec!["R58M123ABC", "emulator-5554"]);
        assert_eq!(devices[0].property("model"), Some("Pixel_7"));
    }

    #[tokio::test]
    async fn test_list_devices_with_query_filter() {
        let (_monitor, server) = server_with(vec![emulator(), pixel()]);
        let devices: Vec<DeviceRecord> = server
            .get("/devices")
            .add_query_param("model", "pixel_7")
            .await
            .json();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "R58M123ABC");

        let unauthorized: Vec<DeviceRecord> = server
            .get("/devices")
            .add_query_param("state", "unauthorized")
            .await
            .json();
        assert_eq!(unauthorized.len(), 1);
        assert_eq!(unauthorized[0].serial, "emulator-5554");
    }

    #[tokio::test]
    async fn test_get_device_by_serial() {
        let (_monitor, server) = server_with(vec![pixel()]);
        let response = server.get("/devices/R58M123ABC").await;
        response.assert_status_ok();
        let json: serde_json::Value = response.json();
        assert_eq!(json["serial"], "R58M123ABC");
        assert_eq!(json["state"], "device");
        assert_eq!(json["properties"]["transport_id"], "3");
    }

    #[tokio::test]
    async fn test_unknown_serial_is_not_found() {
        let (_monitor, server) = server_with(vec![pixel()]);
        let response = server.get("/devices/nope").await;
        response.assert_status_not_found();
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "device_not_found");
    }

    #[tokio::test]
    async fn test_undecodable_serial_is_json_400() {
        let (_monitor, server) = server_with(vec![pixel()]);
        let response = server.get("/devices/%FF").await;
        response.assert_status_bad_request();
        assert!(response
            .header("content-type")
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "invalid_path");
        assert!(body.details.is_some());
    }

    #[tokio::test]
    async fn test_snapshot_swap_is_visible() {
        let (monitor, server) = server_with(Vec::new());
        server.get("/devices/R58M123ABC").await.assert_status_not_found();
        monitor.publish(Arc::new(DeviceSnapshot::from_records([pixel()])));
        server.get("/devices/R58M123ABC").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let (_monitor, server) = server_with(Vec::new());
        let response = server.get("/nowhere").await;
        response.assert_status_not_found();
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "not_found");
    }

    #[tokio::test]
    async fn test_wrong_method_is_json_405() {
        let (_monitor, server) = server_with(Vec::new());
        let response = server.post("/devices").await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "method_not_allowed");
    }

    #[tokio::test]
    async fn test_health() {
        let (_monitor, server) = server_with(Vec::new());
        let json: serde_json::Value = server.get("/health").await.json();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_reports_phase_and_power() {
        let (monitor, server) = server_with(vec![pixel(), emulator()]);
        monitor.set_phase(MonitorPhase::Running);
        monitor.record_power(PowerEvent::Wake);

        let status: StatusResponse = server.get("/status").await.json();
        assert_eq!(status.phase, MonitorPhase::Running);
        assert_eq!(status.device_count, 2);
        assert_eq!(status.last_power_event.map(|p| p.event), Some(PowerEvent::Wake));
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let (_monitor, server) = server_with(Vec::new());
        let json: serde_json::Value = server.get("/openapi.json").await.json();
        assert_eq!(json["info"]["title"], "adbstatus API");
    }
}
