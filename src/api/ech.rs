//! Public ECH configuration endpoint.

use axum::{extract::State, Json};
use base64ct::{Base64, Encoding};
use serde::Serialize;
use utoipa::ToSchema;

use crate::ech::wire;
use crate::error::{ok, ApiError, Envelope};
use crate::models::now_ts;
use crate::state::AppState;

/// Clients refetch no later than this.
const REFRESH_HINT_SECS: i64 = 86_400;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EchConfigResponse {
    /// Base64 ECHConfigList for the active key.
    pub ech_config_list: String,
    /// ECHConfig wire version (draft-18).
    pub version: u16,
    pub expires_at: i64,
    pub refresh_hint_secs: i64,
}

/// No principal required: the config list is public key material.
#[utoipa::path(
    get,
    path = "/api/ech/config",
    tag = "ECH",
    responses(
        (status = 200, description = "Active ECH config list", body = EchConfigResponse),
        (status = 503, description = "Key bootstrap failed")
    )
)]
pub async fn get_config(
    State(state): State<AppState>,
) -> Result<Json<Envelope<EchConfigResponse>>, ApiError> {
    // A cold deployment may not have rotated yet; generate on demand.
    state.keystore.ensure_active(now_ts()).map_err(|err| {
        tracing::error!(error = %err, "ECH key bootstrap failed");
        ApiError::service_unavailable("ECH keys unavailable")
    })?;

    let (list, key) = state
        .keystore
        .active_config_list()
        .map_err(|err| {
            tracing::error!(error = %err, "ECH config list build failed");
            ApiError::service_unavailable("ECH keys unavailable")
        })?
        .ok_or_else(|| ApiError::service_unavailable("ECH keys unavailable"))?;

    Ok(ok(EchConfigResponse {
        ech_config_list: Base64::encode_string(&list),
        version: wire::ECH_VERSION,
        expires_at: key.expires_at,
        refresh_hint_secs: REFRESH_HINT_SECS,
    }))
}
