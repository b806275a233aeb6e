//! Slave (relay node) surface.
//!
//! Every route here sits behind the basic-auth middleware: the username is
//! the node's IPv4 and the password its shared secret.

use axum::{
    extract::{Query, State},
    Json,
};
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::auth::{SlaveAuth, TokenType};
use crate::error::{ok, ApiError, Envelope};
use crate::models::{now_ts, EchKeyStatus, User};
use crate::state::AppState;

// === Device check-auth ===

#[derive(Deserialize, ToSchema)]
pub struct CheckAuthRequest {
    pub udid: String,
    /// Either a JWT access token or the device's derived password.
    pub token: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckAuthResponse {
    #[serde(rename = "userID")]
    pub user_id: u64,
    pub udid: String,
    #[serde(rename = "serviceExpiredAt")]
    pub service_expired_at: i64,
}

/// Dual-mode device credential check.
///
/// A token that looks like a JWT (starts with `eyJ`, exactly two dots) is
/// validated as an access token whose `device_id` must equal the supplied
/// udid. Anything else is treated as the derived password and checked with
/// bcrypt against the device row. All failures except an expired membership
/// collapse to 401.
#[utoipa::path(
    post,
    path = "/slave/device/check-auth",
    request_body = CheckAuthRequest,
    tag = "Slave",
    responses(
        (status = 200, description = "Credential is valid", body = CheckAuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 402, description = "Membership expired")
    )
)]
pub async fn check_auth(
    State(state): State<AppState>,
    SlaveAuth(_node): SlaveAuth,
    Json(request): Json<CheckAuthRequest>,
) -> Result<Json<Envelope<CheckAuthResponse>>, ApiError> {
    let user = if looks_like_jwt(&request.token) {
        check_jwt(&state, &request)?
    } else {
        check_password(&state, &request)?
    };

    if user.is_expired() {
        return Err(ApiError::membership_expired());
    }
    Ok(ok(CheckAuthResponse {
        user_id: user.id,
        udid: request.udid,
        service_expired_at: user.expired_at,
    }))
}

fn looks_like_jwt(token: &str) -> bool {
    token.starts_with("eyJ") && token.matches('.').count() == 2
}

fn check_jwt(state: &AppState, request: &CheckAuthRequest) -> Result<User, ApiError> {
    let claims = state
        .tokens
        .validate(&request.token, TokenType::Access)
        .map_err(|_| ApiError::invalid_credentials())?;
    if claims.device_id != request.udid {
        return Err(ApiError::invalid_credentials());
    }
    let ctx = state
        .tokens
        .resolve(&claims)
        .map_err(|_| ApiError::invalid_credentials())?;
    Ok(ctx.user)
}

fn check_password(state: &AppState, request: &CheckAuthRequest) -> Result<User, ApiError> {
    let mut device = state
        .store
        .device(&request.udid)?
        .ok_or_else(ApiError::invalid_credentials)?;
    if device.password_hash.is_empty() {
        return Err(ApiError::invalid_credentials());
    }
    let matched = bcrypt::verify(&request.token, &device.password_hash)
        .map_err(|_| ApiError::invalid_credentials())?;
    if !matched {
        return Err(ApiError::invalid_credentials());
    }
    let user = state
        .store
        .user(device.user_id)?
        .ok_or_else(ApiError::invalid_credentials)?;

    // Best-effort bookkeeping; a write failure must not fail the auth.
    device.last_used_at = now_ts();
    if let Err(err) = state.store.save_device(&device) {
        tracing::warn!(udid = %device.udid, error = %err, "last-used update failed");
    }
    Ok(user)
}

// === ECH key distribution ===

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlaveEchKey {
    pub config_id: u8,
    pub status: EchKeyStatus,
    /// Base64, 32 bytes.
    pub public_key: String,
    /// Base64, 32 bytes.
    pub private_key: String,
    /// Base64 ECHConfig bytes.
    pub config: String,
    pub kem_id: u16,
    pub kdf_id: u16,
    pub aead_id: u16,
    pub activated_at: i64,
    pub expires_at: i64,
}

/// Decryptable keypairs for front-door HPKE: active first, then grace.
/// A key whose blobs fail to decrypt is logged and skipped; the rest are
/// still returned.
#[utoipa::path(
    get,
    path = "/slave/ech/keys",
    tag = "Slave",
    responses((status = 200, description = "Decryptable ECH keys", body = [SlaveEchKey]))
)]
pub async fn ech_keys(
    State(state): State<AppState>,
    SlaveAuth(_node): SlaveAuth,
) -> Result<Json<Envelope<Vec<SlaveEchKey>>>, ApiError> {
    let keys = state.keystore.decryptable_keys().map_err(|err| {
        tracing::error!(error = %err, "ECH key listing failed");
        ApiError::system("internal error")
    })?;

    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        match state.keystore.decrypt_material(&key) {
            Ok(material) => out.push(SlaveEchKey {
                config_id: key.config_id,
                status: key.status,
                public_key: Base64::encode_string(&material.public_key),
                private_key: Base64::encode_string(&material.private_key),
                config: Base64::encode_string(&material.config),
                kem_id: key.kem_id,
                kdf_id: key.kdf_id,
                aead_id: key.aead_id,
                activated_at: key.activated_at,
                expires_at: key.expires_at,
            }),
            Err(err) => {
                tracing::error!(config_id = key.config_id, error = %err, "ECH key decrypt failed, skipping");
            }
        }
    }
    Ok(ok(out))
}

// === Topology helpers ===

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratePath {
    pub id: u64,
    pub domain: String,
    pub name: String,
    pub protocol: String,
    pub port: u16,
    /// Whether the tunnel terminates on the calling node.
    pub is_current: bool,
}

#[utoipa::path(
    get,
    path = "/slave/accelerate/tunnels",
    tag = "Slave",
    responses((status = 200, description = "Full tunnel topology", body = [AcceleratePath]))
)]
pub async fn accelerate_tunnels(
    State(state): State<AppState>,
    SlaveAuth(node): SlaveAuth,
) -> Result<Json<Envelope<Vec<AcceleratePath>>>, ApiError> {
    let paths = state
        .store
        .tunnels()?
        .into_iter()
        .map(|t| AcceleratePath {
            id: t.id,
            domain: t.domain,
            name: t.name,
            protocol: t.protocol.as_str().to_string(),
            port: t.port,
            is_current: t.node_id == node.id,
        })
        .collect();
    Ok(ok(paths))
}

#[derive(Deserialize, IntoParams)]
pub struct ResolveQuery {
    pub domain: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTunnel {
    pub id: u64,
    pub domain: String,
    pub protocol: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
}

/// SNI → tunnel lookup. First match in tunnel-id order wins.
#[utoipa::path(
    get,
    path = "/slave/resolve",
    params(ResolveQuery),
    tag = "Slave",
    responses(
        (status = 200, description = "Matching tunnel", body = ResolvedTunnel),
        (status = 404, description = "No tunnel matches the SNI")
    )
)]
pub async fn resolve(
    State(state): State<AppState>,
    SlaveAuth(_node): SlaveAuth,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<Envelope<ResolvedTunnel>>, ApiError> {
    let tunnel = state
        .store
        .tunnels()?
        .into_iter()
        .find(|t| match_domain_pattern(&query.domain, &t.domain))
        .ok_or_else(|| ApiError::not_found("tunnel"))?;

    let ipv4 = state.store.node(tunnel.node_id)?.map(|n| n.ipv4);
    Ok(ok(ResolvedTunnel {
        id: tunnel.id,
        domain: tunnel.domain,
        protocol: tunnel.protocol.as_str().to_string(),
        port: tunnel.port,
        ipv4,
    }))
}

/// SNI matcher.
///
/// - exact equality
/// - `*.X` requires at least one extra label: the SNI must end with `.X`
/// - `*X` is a bare suffix match
pub fn match_domain_pattern(sni: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        sni.len() > suffix.len() + 1 && sni.ends_with(suffix)
            && sni.as_bytes()[sni.len() - suffix.len() - 1] == b'.'
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        sni.ends_with(suffix)
    } else {
        sni == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_detection() {
        assert!(looks_like_jwt("eyJhbGci.eyJzdWIi.c2ln"));
        assert!(!looks_like_jwt("eyJhbGci.eyJzdWIi"));
        assert!(!looks_like_jwt("a1b2c3d4e5f6"));
        assert!(!looks_like_jwt("eyJ.a.b.c"));
    }

    #[test]
    fn sni_matcher_exact_and_wildcards() {
        assert!(match_domain_pattern("a.b.example.com", "*.example.com"));
        assert!(!match_domain_pattern("example.com", "*.example.com"));
        assert!(match_domain_pattern("xexample.com", "*example.com"));
        assert!(match_domain_pattern("example.com", "example.com"));
        assert!(!match_domain_pattern("example.org", "example.com"));
        assert!(match_domain_pattern("example.com", "*example.com"));
    }
}
