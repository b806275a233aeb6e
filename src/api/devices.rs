//! Device management for the signed-in user.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Auth;
use crate::error::{ok, ApiError, Envelope};
use crate::models::Device;
use crate::state::AppState;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceItem {
    pub udid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub last_used_at: i64,
    pub created_at: i64,
    /// Whether this row is the device making the request.
    pub is_current: bool,
}

impl DeviceItem {
    pub(crate) fn from_device(device: Device, current_udid: Option<&str>) -> Self {
        let is_current = current_udid == Some(device.udid.as_str());
        Self {
            udid: device.udid,
            remark: device.remark,
            app_version: device.app_version,
            platform: device.platform,
            os: device.os,
            os_version: device.os_version,
            model: device.model,
            last_used_at: device.last_used_at,
            created_at: device.created_at,
            is_current,
        }
    }
}

#[utoipa::path(
    get,
    path = "/devices",
    tag = "Devices",
    responses((status = 200, description = "Caller's devices", body = [DeviceItem]))
)]
pub async fn list(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> Result<Json<Envelope<Vec<DeviceItem>>>, ApiError> {
    let current = ctx.udid().map(str::to_string);
    let devices = state
        .store
        .devices_by_user(ctx.user_id())?
        .into_iter()
        .map(|d| DeviceItem::from_device(d, current.as_deref()))
        .collect();
    Ok(ok(devices))
}

#[utoipa::path(
    delete,
    path = "/devices/{udid}",
    params(("udid" = String, Path, description = "Device identifier")),
    tag = "Devices",
    responses(
        (status = 200, description = "Device deleted"),
        (status = 400, description = "Cannot delete the current device"),
        (status = 404, description = "Not the caller's device")
    )
)]
pub async fn remove(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(udid): Path<String>,
) -> Result<Json<Envelope<()>>, ApiError> {
    if ctx.udid() == Some(udid.as_str()) {
        return Err(ApiError::invalid_operation(
            "cannot delete the device making this request",
        ));
    }
    let device = state
        .store
        .device(&udid)?
        .filter(|d| d.user_id == ctx.user_id())
        .ok_or_else(|| ApiError::not_found("device"))?;
    state.store.delete_device(&device.udid)?;
    Ok(ok(()))
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateRemarkRequest {
    pub remark: String,
}

#[utoipa::path(
    put,
    path = "/devices/{udid}/remark",
    params(("udid" = String, Path, description = "Device identifier")),
    request_body = UpdateRemarkRequest,
    tag = "Devices",
    responses(
        (status = 200, description = "Remark updated"),
        (status = 404, description = "Not the caller's device")
    )
)]
pub async fn update_remark(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(udid): Path<String>,
    Json(request): Json<UpdateRemarkRequest>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let mut device = state
        .store
        .device(&udid)?
        .filter(|d| d.user_id == ctx.user_id())
        .ok_or_else(|| ApiError::not_found("device"))?;
    device.remark = if request.remark.is_empty() {
        None
    } else {
        Some(request.remark)
    };
    state.store.save_device(&device)?;
    Ok(ok(()))
}
