//! Dashboard/app authentication: email verification codes and login.

use axum::{
    extract::State,
    http::header::SET_COOKIE,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::middleware::{
    build_cookie, ACCESS_TOKEN_COOKIE, CSRF_TOKEN_COOKIE,
};
use crate::auth::tokens::COOKIE_TTL_SECS;
use crate::auth::TokenType;
use crate::error::{ok, ApiError, Envelope};
use crate::models::Device;
use crate::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct SendCodeRequest {
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/app/auth/code",
    request_body = SendCodeRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Code sent"),
        (status = 429, description = "Cooldown in effect")
    )
)]
pub async fn send_code(
    State(state): State<AppState>,
    Json(request): Json<SendCodeRequest>,
) -> Result<Json<Envelope<()>>, ApiError> {
    let email = normalize_email(&request.email)?;
    let code = state.codes.send_code(&email)?;
    // Mail delivery is handled out of process; the code is logged for the
    // mailer sidecar to pick up.
    tracing::info!(email = %email, code = %code, "verification code issued");
    Ok(ok(()))
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub code: String,
    /// Present for native clients; absent for browser logins.
    #[serde(default)]
    pub udid: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Slave-verifier password; device logins only, shown once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub service_expired_at: i64,
}

/// Exchange a verification code for tokens.
///
/// Device logins (with udid) get an access/refresh pair plus the derived
/// password. Browser logins additionally receive `access_token` and
/// `csrf_token` cookies for the cookie carrier.
#[utoipa::path(
    post,
    path = "/app/auth/login",
    request_body = LoginRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 401, description = "Bad verification code")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let email = normalize_email(&request.email)?;
    if !state.codes.verify_code(&email, &request.code) {
        return Err(ApiError::invalid_credentials());
    }
    let user = state.store.get_or_create_user(&email)?;

    if let Some(udid) = request.udid.filter(|u| !u.is_empty()) {
        // Re-login from a device another account used re-owns the udid.
        let mut device = match state.store.device(&udid)? {
            Some(existing) if existing.user_id == user.id => existing,
            _ => Device::new(udid, user.id),
        };
        let tokens = state.tokens.issue_device(&user, &mut device)?;
        return Ok(ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            password: Some(tokens.password),
            service_expired_at: user.expired_at,
        })
        .into_response());
    }

    let tokens = state.tokens.issue_web(&user)?;
    let cookie_token = state.tokens.issue_cookie(user.id, user.roles)?;
    let csrf = Uuid::new_v4().to_string();

    let body = ok(LoginResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        password: None,
        service_expired_at: user.expired_at,
    });
    let mut response = body.into_response();
    append_cookie(
        &mut response,
        &build_cookie(
            ACCESS_TOKEN_COOKIE,
            &cookie_token,
            COOKIE_TTL_SECS,
            true,
            state.config.production,
        ),
    );
    append_cookie(
        &mut response,
        &build_cookie(
            CSRF_TOKEN_COOKIE,
            &csrf,
            COOKIE_TTL_SECS,
            false,
            state.config.production,
        ),
    );
    Ok(response)
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/app/auth/refresh",
    request_body = RefreshRequest,
    tag = "Auth",
    responses(
        (status = 200, description = "Fresh token pair", body = LoginResponse),
        (status = 401, description = "Invalid refresh token")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<Envelope<LoginResponse>>, ApiError> {
    let ctx = state
        .tokens
        .authenticate(&request.refresh_token, TokenType::Refresh)?;

    let response = match ctx.device {
        Some(mut device) => {
            let tokens = state.tokens.issue_device(&ctx.user, &mut device)?;
            LoginResponse {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                password: Some(tokens.password),
                service_expired_at: ctx.user.expired_at,
            }
        }
        None => {
            let tokens = state.tokens.issue_web(&ctx.user)?;
            LoginResponse {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
                password: None,
                service_expired_at: ctx.user.expired_at,
            }
        }
    };
    Ok(ok(response))
}

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    };
    if !valid {
        return Err(ApiError::invalid_argument("invalid email address"));
    }
    Ok(email)
}

fn append_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = axum::http::HeaderValue::from_str(cookie) {
        response.headers_mut().append(SET_COOKIE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization() {
        assert_eq!(
            normalize_email(" Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@nodot").is_err());
    }
}
