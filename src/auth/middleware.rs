//! Request authentication middleware.
//!
//! The principal is resolved exactly once per request and cached in the
//! request extensions; extractors and gates read it from there. Credential
//! carriers are examined in a fixed order, and the first carrier that is
//! *present* wins — a present-but-invalid credential yields a nil principal
//! without falling through to later carriers:
//!
//! 1. `access_token` cookie (non-GET additionally requires the
//!    `X-CSRF-Token` header to equal the `csrf_token` cookie)
//! 2. `X-Access-Key` header
//! 3. `Authorization: Bearer <jwt>` header
//! 4. `?token=<jwt>` query parameter (WebSocket cross-origin fallback)
//!
//! Cookie-carried tokens get a sliding renewal: within 7 days of expiry a
//! fresh 60-day cookie is appended to the response. Renewal failures are
//! logged, never surfaced.

use std::sync::OnceLock;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::Response,
};
use base64ct::{Base64, Encoding};
use regex::Regex;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::models::{now_ts, SlaveNode};
use crate::state::AppState;

use super::claims::{AuthContext, TokenType};
use super::tokens::{TokenService, COOKIE_TTL_SECS};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const CSRF_TOKEN_COOKIE: &str = "csrf_token";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const ACCESS_KEY_HEADER: &str = "x-access-key";

/// Resolve the principal and stash it in request extensions, then run the
/// rest of the stack. Never rejects by itself; the gates do that.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let (principal, renewed_cookie) = resolve_principal(&state, &req);

    if let Some(ctx) = &principal {
        sniff_user_agent(&state, req.headers(), ctx);
        req.extensions_mut().insert(ctx.clone());
    }

    let mut response = next.run(req).await;

    if let Some(token) = renewed_cookie {
        let cookie = build_cookie(
            ACCESS_TOKEN_COOKIE,
            &token,
            COOKIE_TTL_SECS,
            true,
            state.config.production,
        );
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(_) => tracing::warn!("renewed cookie not header-safe, skipping"),
        }
    }

    response
}

/// Ordered carrier scan. Returns the principal (if any) and, for the cookie
/// carrier, a renewed token when the current one is close to expiry.
fn resolve_principal(state: &AppState, req: &Request) -> (Option<AuthContext>, Option<String>) {
    let headers = req.headers();

    // 1. Cookie.
    if let Some(token) = cookie_value(headers, ACCESS_TOKEN_COOKIE) {
        if req.method() != Method::GET && !csrf_ok(headers) {
            return (None, None);
        }
        let claims = match state.tokens.validate(&token, TokenType::Access) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "cookie token rejected");
                return (None, None);
            }
        };
        let ctx = match state.tokens.resolve(&claims) {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::debug!(error = %err, "cookie principal rejected");
                return (None, None);
            }
        };
        let renewed = if TokenService::needs_renewal(&claims, now_ts()) {
            match state.tokens.issue_cookie(claims.user_id, claims.roles) {
                Ok(token) => Some(token),
                Err(err) => {
                    tracing::warn!(error = %err, "cookie renewal failed");
                    None
                }
            }
        } else {
            None
        };
        return (Some(ctx), renewed);
    }

    // 2. Static access key.
    if let Some(key) = header_str(headers, ACCESS_KEY_HEADER) {
        return match state.store.user_by_access_key(key) {
            Ok(Some(user)) => (Some(AuthContext { user, device: None }), None),
            Ok(None) => (None, None),
            Err(err) => {
                tracing::error!(error = %err, "access-key lookup failed");
                (None, None)
            }
        };
    }

    // 3. Bearer token.
    if let Some(auth) = header_str(headers, header::AUTHORIZATION.as_str()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            return (
                state
                    .tokens
                    .authenticate(token.trim(), TokenType::Access)
                    .map_err(|err| tracing::debug!(error = %err, "bearer token rejected"))
                    .ok(),
                None,
            );
        }
    }

    // 4. Query parameter.
    if let Some(token) = query_param(req.uri().query(), "token") {
        return (
            state
                .tokens
                .authenticate(&token, TokenType::Access)
                .map_err(|err| tracing::debug!(error = %err, "query token rejected"))
                .ok(),
            None,
        );
    }

    (None, None)
}

fn csrf_ok(headers: &HeaderMap) -> bool {
    let Some(header) = header_str(headers, CSRF_HEADER) else {
        return false;
    };
    let Some(cookie) = cookie_value(headers, CSRF_TOKEN_COOKIE) else {
        return false;
    };
    bool::from(header.as_bytes().ct_eq(cookie.as_bytes()))
}

/// Update the device row's observed app descriptors when the User-Agent
/// reports new values. Best-effort; DB failure is logged and swallowed.
fn sniff_user_agent(state: &AppState, headers: &HeaderMap, ctx: &AuthContext) {
    let Some(device) = &ctx.device else {
        return;
    };
    let Some(ua) = header_str(headers, header::USER_AGENT.as_str()) else {
        return;
    };
    let Some(info) = parse_user_agent(ua) else {
        return;
    };

    let mut device = device.clone();
    let mut changed = false;
    let mut apply = |slot: &mut Option<String>, value: Option<&str>| {
        if let Some(value) = value {
            if slot.as_deref() != Some(value) {
                *slot = Some(value.to_string());
                changed = true;
            }
        }
    };
    apply(&mut device.app_version, Some(&info.version));
    apply(&mut device.platform, Some(&info.platform));
    apply(&mut device.arch, Some(&info.arch));
    apply(&mut device.os, info.os.as_deref());
    apply(&mut device.os_version, info.os_version.as_deref());
    apply(&mut device.model, info.model.as_deref());

    if changed {
        if let Err(err) = state.store.save_device(&device) {
            tracing::warn!(udid = %device.udid, error = %err, "device UA update failed");
        }
    }
}

pub struct UserAgentInfo {
    pub version: String,
    pub platform: String,
    pub arch: String,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub model: Option<String>,
}

/// Parse `kaitu-service/<ver> (<plat>; <arch>[; <os> <osver>[; <model>]])`.
pub fn parse_user_agent(ua: &str) -> Option<UserAgentInfo> {
    static UA_RE: OnceLock<Regex> = OnceLock::new();
    let re = UA_RE.get_or_init(|| {
        Regex::new(
            r"^kaitu-service/(\S+) \(([^;)]+); ([^;)]+)(?:; ([^;)\s]+) ([^;)]+))?(?:; ([^)]+))?\)",
        )
        .expect("user-agent regex")
    });
    let caps = re.captures(ua)?;
    Some(UserAgentInfo {
        version: caps[1].to_string(),
        platform: caps[2].trim().to_string(),
        arch: caps[3].trim().to_string(),
        os: caps.get(4).map(|m| m.as_str().to_string()),
        os_version: caps.get(5).map(|m| m.as_str().trim().to_string()),
        model: caps.get(6).map(|m| m.as_str().trim().to_string()),
    })
}

/// Basic-auth gate for the slave surface: identifier is the node's IPv4,
/// password its shared secret. The resolved node lands in extensions.
pub async fn slave_authenticate(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let node = resolve_slave(&state, req.headers()).ok_or_else(ApiError::invalid_credentials)?;
    req.extensions_mut().insert(node);
    Ok(next.run(req).await)
}

fn resolve_slave(state: &AppState, headers: &HeaderMap) -> Option<SlaveNode> {
    let auth = header_str(headers, header::AUTHORIZATION.as_str())?;
    let encoded = auth.strip_prefix("Basic ")?;
    let decoded = Base64::decode_vec(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (ipv4, secret) = decoded.split_once(':')?;

    let node = match state.store.node_by_ipv4(ipv4) {
        Ok(Some(node)) => node,
        Ok(None) => return None,
        Err(err) => {
            tracing::error!(error = %err, "slave node lookup failed");
            return None;
        }
    };
    if bool::from(secret.as_bytes().ct_eq(node.secret.as_bytes())) {
        Some(node)
    } else {
        None
    }
}

// === Cookie helpers ===

pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for raw in headers.get_all(header::COOKIE) {
        let Ok(raw) = raw.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((k, v)) = pair.trim().split_once('=') {
                if k == name {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

/// `SameSite=Lax`, `Path=/`; `Secure` in production.
pub fn build_cookie(
    name: &str,
    value: &str,
    max_age_secs: i64,
    http_only: bool,
    secure: bool,
) -> String {
    let mut cookie = format!("{name}={value}; Path=/; Max-Age={max_age_secs}; SameSite=Lax");
    if http_only {
        cookie.push_str("; HttpOnly");
    }
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == name {
                // JWTs are URL-safe and never contain '%' escapes.
                return Some(v.to_string());
            }
        }
    }
    None
}
