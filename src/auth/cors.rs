//! Origin-gated CORS.
//!
//! Two policies share one mechanism:
//!
//! - `/api/*` admits private origins only: `localhost`, `127.0.0.1`,
//!   `capacitor://localhost`, and the RFC 1918 ranges `10/8`,
//!   `172.16/12`, `192.168/16`.
//! - `/app/*` admits a configured allowlist of public origins.
//!
//! Both send credentials. Disallowed origins get no CORS headers at all;
//! preflight `OPTIONS` requests short-circuit to an empty 204.

use std::net::Ipv4Addr;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, Response as HttpResponse, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::state::AppState;

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-CSRF-Token, X-Access-Key";

/// CORS for the device surface (`/api/*`): private origins only.
pub async fn api_cors(req: Request, next: Next) -> Response {
    let origin = origin_header(&req).filter(|o| is_private_origin(o));
    apply(origin, req, next).await
}

/// CORS for the dashboard surface (`/app/*`): configured allowlist.
pub async fn app_cors(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let origin = origin_header(&req)
        .filter(|o| state.config.public_cors_origins.iter().any(|a| a == o));
    apply(origin, req, next).await
}

async fn apply(allowed_origin: Option<String>, req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut response = HttpResponse::builder()
            .status(StatusCode::NO_CONTENT)
            .body(axum::body::Body::empty())
            .unwrap_or_default();
        set_headers(response.headers_mut(), allowed_origin.as_deref());
        return response;
    }

    let mut response = next.run(req).await;
    set_headers(response.headers_mut(), allowed_origin.as_deref());
    response
}

fn set_headers(headers: &mut axum::http::HeaderMap, origin: Option<&str>) {
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    let Some(origin) = origin else {
        return;
    };
    let Ok(value) = HeaderValue::from_str(origin) else {
        return;
    };
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
}

fn origin_header(req: &Request) -> Option<String> {
    req.headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Whether an `Origin` value names a private deployment.
pub fn is_private_origin(origin: &str) -> bool {
    if origin == "capacitor://localhost" {
        return true;
    }
    let Some(host) = origin_host(origin) else {
        return false;
    };
    if host == "localhost" || host == "127.0.0.1" {
        return true;
    }
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => is_rfc1918(ip),
        Err(_) => false,
    }
}

fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin.split_once("://")?.1;
    let host = rest.split('/').next().unwrap_or(rest);
    Some(host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host))
}

fn is_rfc1918(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_origin_hosts() {
        assert!(is_private_origin("http://localhost:3000"));
        assert!(is_private_origin("http://127.0.0.1"));
        assert!(is_private_origin("capacitor://localhost"));
        assert!(is_private_origin("http://10.1.2.3:8080"));
        assert!(is_private_origin("http://192.168.1.10"));
        assert!(!is_private_origin("https://evil.com"));
        assert!(!is_private_origin("http://8.8.8.8"));
        assert!(!is_private_origin("localhost"));
    }

    #[test]
    fn rfc1918_172_range_boundaries() {
        assert!(is_private_origin("http://172.16.0.1"));
        assert!(is_private_origin("http://172.31.255.255"));
        assert!(!is_private_origin("http://172.15.0.1"));
        assert!(!is_private_origin("http://172.32.0.1"));
    }
}
