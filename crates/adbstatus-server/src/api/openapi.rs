//! OpenAPI specification for the adbstatus status API.

use adbstatus_core::{
    DeviceRecord, DeviceState, HealthResponse, MonitorPhase, PowerEvent, PowerTransition,
    StatusResponse,
};
use axum::Json;
use utoipa::OpenApi;

use super::error::ErrorResponse;

/// Serve the OpenAPI specification as JSON at `/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty JSON. Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialised.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for adbstatus.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "adbstatus API",
        description = r#"
# adbstatus API

Read-only view of the Android devices the adbstatus daemon tracks through `adb`.

The daemon polls the device bridge on a fixed interval and publishes each
snapshot. Every endpoint answers from the latest snapshot, so requests never
wait on the bridge and never trigger device actions.

All responses are JSON, errors included. The API is only served over TLS.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local adbstatus daemon")
    ),
    tags(
        (name = "devices", description = "Devices in the current snapshot"),
        (name = "system", description = "Health checks and monitor status")
    ),
    paths(
        super::devices::list_devices,
        super::devices::get_device,
        super::health::health_check,
        super::health::get_status,
    ),
    components(
        schemas(
            ErrorResponse,
            DeviceRecord,
            DeviceState,
            HealthResponse,
            StatusResponse,
            MonitorPhase,
            PowerEvent,
            PowerTransition,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "adbstatus API");
        assert!(spec.paths.paths.contains_key("/devices/{serial}"));
        assert!(spec.paths.paths.contains_key("/status"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"adbstatus API\""));
        assert!(json.contains("DeviceRecord"));
    }
}
