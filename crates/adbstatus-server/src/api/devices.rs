//! Device API endpoints.
//!
//! Both endpoints read the snapshot the monitor last published. They never
//! invoke the device bridge themselves.

use std::collections::BTreeMap;

use adbstatus_core::{DeviceFilter, DeviceRecord};
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Creates the devices router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/{serial}", get(get_device))
}

// ============================================================================
// Handlers
// ============================================================================

/// List connected devices.
///
/// Query parameters act as a filter: `?model=pixel_7&state=device` returns only
/// devices whose properties equal every given value, compared case-insensitively.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List connected devices",
    description = "Returns every device in the current snapshot, in ascending serial \
        order. Any query parameter filters on the property of the same name \
        (`serial`, `state`, `model`, `product`, `transport_id`, ...). An empty \
        result is an empty array.",
    responses(
        (status = 200, description = "Devices in the current snapshot", body = Vec<DeviceRecord>),
        (status = 400, description = "The query string could not be decoded", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn list_devices(
    State(state): State<AppState>,
    query: Result<Query<BTreeMap<String, String>>, QueryRejection>,
) -> ApiResult<Json<Vec<DeviceRecord>>> {
    let Query(filter) = query?;
    let snapshot = state.devices.snapshot();
    let filter: DeviceFilter = filter.into_iter().collect();
    let devices = snapshot
        .devices()
        .filter(|device| filter.matches_ignore_case(device))
        .cloned()
        .collect();
    Ok(Json(devices))
}

/// Get one device by serial.
#[utoipa::path(
    get,
    path = "/devices/{serial}",
    tag = "devices",
    operation_id = "getDevice",
    summary = "Get a device by serial",
    description = "Returns the device with the given serial from the current snapshot.",
    params(
        ("serial" = String, Path, description = "Device serial", example = "R58M123ABC")
    ),
    responses(
        (status = 200, description = "The device", body = DeviceRecord),
        (status = 400, description = "The serial could not be decoded", body = crate::api::error::ErrorResponse),
        (status = 404, description = "No such device is connected", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_device(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<DeviceRecord>> {
    let Path(serial) = path?;
    state
        .devices
        .snapshot()
        .get(&serial)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::device_not_found(&serial))
}
