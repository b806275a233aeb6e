//! Admin surface.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::devices::DeviceItem;
use crate::auth::AdminOnly;
use crate::error::{ok, ApiError, Envelope};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/admin/users/{uuid}/devices",
    params(("uuid" = String, Path, description = "User's external uuid")),
    tag = "Admin",
    responses(
        (status = 200, description = "User's devices", body = [DeviceItem]),
        (status = 403, description = "Admin required"),
        (status = 404, description = "Unknown user")
    )
)]
pub async fn list_user_devices(
    State(state): State<AppState>,
    AdminOnly(_ctx): AdminOnly,
    Path(uuid): Path<String>,
) -> Result<Json<Envelope<Vec<DeviceItem>>>, ApiError> {
    let user = state
        .store
        .user_by_uuid(&uuid)?
        .ok_or_else(|| ApiError::not_found("user"))?;
    let devices = state
        .store
        .devices_by_user(user.id)?
        .into_iter()
        .map(|d| DeviceItem::from_device(d, None))
        .collect();
    Ok(ok(devices))
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MintedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Derived slave-verifier password; shown once.
    pub password: String,
}

/// Mint a fresh token pair for someone else's device. Bumps the device's
/// issuance epoch, so the user's previous tokens stop working.
#[utoipa::path(
    post,
    path = "/admin/users/{uuid}/devices/{udid}/token",
    params(
        ("uuid" = String, Path, description = "User's external uuid"),
        ("udid" = String, Path, description = "Device identifier")
    ),
    tag = "Admin",
    responses(
        (status = 200, description = "Fresh token pair", body = MintedTokens),
        (status = 403, description = "Admin required"),
        (status = 404, description = "Unknown user or device")
    )
)]
pub async fn mint_device_token(
    State(state): State<AppState>,
    AdminOnly(_ctx): AdminOnly,
    Path((uuid, udid)): Path<(String, String)>,
) -> Result<Json<Envelope<MintedTokens>>, ApiError> {
    let user = state
        .store
        .user_by_uuid(&uuid)?
        .ok_or_else(|| ApiError::not_found("user"))?;
    let mut device = state
        .store
        .device(&udid)?
        .filter(|d| d.user_id == user.id)
        .ok_or_else(|| ApiError::not_found("device"))?;

    let tokens = state.tokens.issue_device(&user, &mut device)?;
    Ok(ok(MintedTokens {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        password: tokens.password,
    }))
}
