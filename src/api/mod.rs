//! HTTP surface.
//!
//! Four route groups share one state and one authentication middleware:
//!
//! - `/api/*` - device-facing, private-origin CORS
//! - `/app/*` - dashboard, allowlisted CORS
//! - `/slave/*` - relay nodes, HTTP basic auth (IPv4 + shared secret)
//! - `/admin/*` - admin principals
//!
//! plus the top-level user routes (`/tunnels`, `/devices`, wallet views).

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::alert;
use crate::auth::{cors, middleware as auth_middleware};
use crate::error::Page;
use crate::models::{EchKeyStatus, TunnelProtocol, Wallet, WalletChange, Withdraw, WithdrawAccount};
use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod devices;
pub mod ech;
pub mod health;
pub mod slave;
pub mod tunnels;
pub mod wallet;

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/ech/config", get(ech::get_config))
        .layer(from_fn(cors::api_cors));

    let app_routes = Router::new()
        .route("/auth/code", post(auth::send_code))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .layer(from_fn_with_state(state.clone(), cors::app_cors));

    let slave_routes = Router::new()
        .route("/device/check-auth", post(slave::check_auth))
        .route("/ech/keys", get(slave::ech_keys))
        .route("/accelerate/tunnels", get(slave::accelerate_tunnels))
        .route("/resolve", get(slave::resolve))
        .layer(from_fn_with_state(
            state.clone(),
            auth_middleware::slave_authenticate,
        ));

    let admin_routes = Router::new()
        .route("/users/{uuid}/devices", get(admin::list_user_devices))
        .route(
            "/users/{uuid}/devices/{udid}/token",
            post(admin::mint_device_token),
        );

    Router::new()
        .route("/healthz", get(health::healthz))
        .nest("/api", api_routes)
        .nest("/app", app_routes)
        .nest("/slave", slave_routes)
        .nest("/admin", admin_routes)
        .route("/tunnels", get(tunnels::list_legacy))
        .route("/tunnels/{protocol}", get(tunnels::list_protocol))
        .route("/k2/relays", get(tunnels::relays))
        .route("/devices", get(devices::list))
        .route("/devices/{udid}", delete(devices::remove))
        .route("/devices/{udid}/remark", put(devices::update_remark))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/changes", get(wallet::list_changes))
        .route(
            "/withdraw/accounts",
            get(wallet::list_accounts).post(wallet::create_account),
        )
        .route(
            "/withdraws",
            get(wallet::list_withdraws).post(wallet::create_withdraw),
        )
        .layer(from_fn_with_state(
            state.clone(),
            auth_middleware::authenticate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(alert::panic_handler(
            state.config.clone(),
        )))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz,
        ech::get_config,
        auth::send_code,
        auth::login,
        auth::refresh,
        tunnels::list_legacy,
        tunnels::list_protocol,
        tunnels::relays,
        devices::list,
        devices::remove,
        devices::update_remark,
        slave::check_auth,
        slave::ech_keys,
        slave::accelerate_tunnels,
        slave::resolve,
        admin::list_user_devices,
        admin::mint_device_token,
        wallet::get_wallet,
        wallet::list_changes,
        wallet::list_accounts,
        wallet::create_account,
        wallet::list_withdraws,
        wallet::create_withdraw
    ),
    components(
        schemas(
            health::Health,
            ech::EchConfigResponse,
            auth::SendCodeRequest,
            auth::LoginRequest,
            auth::LoginResponse,
            auth::RefreshRequest,
            tunnels::TunnelList,
            tunnels::TunnelItem,
            tunnels::DataTunnelInstance,
            tunnels::RelayItem,
            devices::DeviceItem,
            devices::UpdateRemarkRequest,
            slave::CheckAuthRequest,
            slave::CheckAuthResponse,
            slave::SlaveEchKey,
            slave::AcceleratePath,
            slave::ResolvedTunnel,
            admin::MintedTokens,
            wallet::ChangesPage,
            wallet::CreateAccountRequest,
            wallet::CreateWithdrawRequest,
            EchKeyStatus,
            TunnelProtocol,
            Wallet,
            WalletChange,
            WithdrawAccount,
            Withdraw,
            Page
        )
    ),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Auth", description = "Verification codes and login"),
        (name = "ECH", description = "Public ECH configuration"),
        (name = "Tunnels", description = "Tunnel directory"),
        (name = "Devices", description = "Device management"),
        (name = "Slave", description = "Relay node callbacks"),
        (name = "Admin", description = "Administrative operations"),
        (name = "Wallet", description = "Wallet and withdrawals")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, HeaderMap, Method, Request, StatusCode};
    use base64ct::{Base64, Encoding};
    use http_body_util::BodyExt;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::auth::{TokenClaims, TokenType};
    use crate::models::{now_ts, Device, TunnelProtocol, User};
    use crate::state::AppState;
    use crate::test_support::{sample_node, sample_tunnel, test_state, TEST_JWT_SECRET};

    fn setup() -> (Router, AppState, tempfile::TempDir) {
        let (state, dir) = test_state();
        (router(state.clone()), state, dir)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, headers, body)
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn bearer(req: Request<Body>, token: &str) -> Request<Body> {
        let (mut parts, body) = req.into_parts();
        parts.headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        Request::from_parts(parts, body)
    }

    fn basic_auth(ipv4: &str, secret: &str) -> String {
        format!("Basic {}", Base64::encode_string(format!("{ipv4}:{secret}").as_bytes()))
    }

    fn seed_user(state: &AppState, email: &str) -> User {
        state.store.get_or_create_user(email).unwrap()
    }

    fn seed_device(state: &AppState, user: &User, udid: &str) -> (Device, String, String) {
        let mut device = Device::new(udid, user.id);
        state.store.save_device(&device).unwrap();
        let tokens = state.tokens.issue_device(user, &mut device).unwrap();
        (device, tokens.access_token, tokens.password)
    }

    fn seed_slave(state: &AppState) -> crate::models::SlaveNode {
        let mut node = sample_node("5.6.7.8", "hkg");
        state.store.save_node(&mut node).unwrap();
        node
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let (app, _state, _dir) = setup();
        let (status, _, body) = send(&app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn tunnels_require_a_principal() {
        let (app, _state, _dir) = setup();
        let (status, _, body) = send(&app, get("/tunnels")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], 401);
    }

    // S1: membership expiry gates slave check-auth, never tunnel listing.
    #[tokio::test]
    async fn expired_membership_lists_tunnels_but_fails_check_auth() {
        let (app, state, _dir) = setup();
        let mut user = seed_user(&state, "s1@example.com");
        user.expired_at = now_ts() - 10;
        state.store.save_user(&user).unwrap();
        let (_, access_token, _) = seed_device(&state, &user, "udid-s1");

        let (status, _, body) = send(&app, bearer(get("/tunnels"), &access_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);

        let node = seed_slave(&state);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/slave/device/check-auth")
            .header(header::AUTHORIZATION, basic_auth(&node.ipv4, &node.secret))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "udid": "udid-s1", "token": access_token }).to_string(),
            ))
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    }

    // S2: protocol aliasing and legacy renaming.
    #[tokio::test]
    async fn protocol_aliasing_and_legacy_view() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "s2@example.com");
        let (_, token, _) = seed_device(&state, &user, "udid-s2");

        let mut node = sample_node("9.9.9.9", "nrt");
        state.store.save_node(&mut node).unwrap();
        let mut a = sample_tunnel(TunnelProtocol::K2v4, node.id);
        let mut b = sample_tunnel(TunnelProtocol::K2v5, node.id);
        b.server_url = Some("https://front.example.net".to_string());
        let mut c = sample_tunnel(TunnelProtocol::K2oc, node.id);
        state.store.save_tunnel(&mut a).unwrap();
        state.store.save_tunnel(&mut b).unwrap();
        state.store.save_tunnel(&mut c).unwrap();

        let ids = |body: &Value| -> Vec<u64> {
            body["data"]["tunnels"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["id"].as_u64().unwrap())
                .collect()
        };

        let (_, _, body) = send(&app, bearer(get("/tunnels/k2v4"), &token)).await;
        assert_eq!(ids(&body), vec![a.id, b.id]);
        // True protocols on the parameterized route.
        assert_eq!(body["data"]["tunnels"][0]["protocol"], "k2v4");
        assert_eq!(body["data"]["tunnels"][1]["protocol"], "k2v5");
        assert_eq!(
            body["data"]["tunnels"][1]["serverUrl"],
            "https://front.example.net"
        );

        let (_, _, body) = send(&app, bearer(get("/tunnels/k2v5"), &token)).await;
        assert_eq!(ids(&body), vec![b.id]);

        // Legacy route: k2oc excluded, every protocol reported as k2wss.
        let (_, _, body) = send(&app, bearer(get("/tunnels"), &token)).await;
        assert_eq!(ids(&body), vec![a.id, b.id]);
        for item in body["data"]["tunnels"].as_array().unwrap() {
            assert_eq!(item["protocol"], "k2wss");
        }
    }

    #[tokio::test]
    async fn test_tunnels_are_admin_only() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "plain@example.com");
        let (_, token, _) = seed_device(&state, &user, "udid-p");
        let mut admin = seed_user(&state, "admin@example.com");
        admin.is_admin = true;
        state.store.save_user(&admin).unwrap();
        let (_, admin_token, _) = seed_device(&state, &admin, "udid-a");

        let mut node = sample_node("9.9.9.9", "nrt");
        state.store.save_node(&mut node).unwrap();
        let mut hidden = sample_tunnel(TunnelProtocol::K2v5, node.id);
        hidden.is_test = true;
        state.store.save_tunnel(&mut hidden).unwrap();

        let (_, _, body) = send(&app, bearer(get("/tunnels"), &token)).await;
        assert!(body["data"]["tunnels"].as_array().unwrap().is_empty());
        let (_, _, body) = send(&app, bearer(get("/tunnels"), &admin_token)).await;
        assert_eq!(body["data"]["tunnels"].as_array().unwrap().len(), 1);
    }

    // Boundary 8 + 9: /api CORS admits private origins only.
    #[tokio::test]
    async fn api_cors_private_origins_only() {
        let (app, _state, _dir) = setup();
        let acao = header::ACCESS_CONTROL_ALLOW_ORIGIN;

        let with_origin = |origin: &str, method: Method| {
            Request::builder()
                .method(method)
                .uri("/api/ech/config")
                .header(header::ORIGIN, origin)
                .body(Body::empty())
                .unwrap()
        };

        let (status, headers, _) = send(&app, with_origin("https://evil.com", Method::GET)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(&acao).is_none());

        let (status, headers, _) =
            send(&app, with_origin("https://evil.com", Method::OPTIONS)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(headers.get(&acao).is_none());

        for origin in ["http://172.16.0.1", "http://172.31.255.255"] {
            let (_, headers, _) = send(&app, with_origin(origin, Method::GET)).await;
            assert_eq!(headers.get(&acao).unwrap(), origin, "{origin}");
        }
        for origin in ["http://172.15.0.1", "http://172.32.0.1"] {
            let (_, headers, _) = send(&app, with_origin(origin, Method::GET)).await;
            assert!(headers.get(&acao).is_none(), "{origin}");
        }

        let (status, headers, _) =
            send(&app, with_origin("http://192.168.1.5", Method::OPTIONS)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(headers.get(&acao).unwrap(), "http://192.168.1.5");
    }

    #[tokio::test]
    async fn app_cors_uses_allowlist() {
        let (app, _state, _dir) = setup();
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/app/auth/login")
            .header(header::ORIGIN, "https://dash.kaitu.example")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://dash.kaitu.example"
        );
    }

    fn cookie_request(
        method: Method,
        path: &str,
        token: &str,
        csrf_cookie: &str,
        csrf_header: Option<&str>,
        body: Value,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(
                header::COOKIE,
                format!("access_token={token}; csrf_token={csrf_cookie}"),
            )
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(value) = csrf_header {
            builder = builder.header("X-CSRF-Token", value);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    // S4: double-submit CSRF on non-GET cookie requests.
    #[tokio::test]
    async fn csrf_mismatch_rejects_cookie_mutations() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "s4@example.com");
        let token = state.tokens.issue_cookie(user.id, user.roles).unwrap();
        let body = json!({
            "accountType": "bank",
            "accountNo": "123",
            "holderName": "Alice"
        });

        let req = cookie_request(
            Method::POST,
            "/withdraw/accounts",
            &token,
            "B",
            Some("A"),
            body.clone(),
        );
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = cookie_request(
            Method::POST,
            "/withdraw/accounts",
            &token,
            "A",
            Some("A"),
            body,
        );
        let (status, _, resp) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["data"]["holder_name"], "Alice");
    }

    fn cookie_token_with_exp(user: &User, exp: i64) -> String {
        let claims = TokenClaims {
            user_id: user.id,
            device_id: String::new(),
            exp,
            token_type: TokenType::Access,
            token_issue_at: now_ts(),
            roles: user.roles,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }

    // Boundary 11: sliding renewal inside the 7-day window only.
    #[tokio::test]
    async fn cookie_renewal_window() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "renew@example.com");

        let near = cookie_token_with_exp(&user, now_ts() + 3 * 86_400);
        let req = Request::builder()
            .uri("/devices")
            .header(header::COOKIE, format!("access_token={near}"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("access_token="));
        assert!(set_cookie.contains("HttpOnly"));

        let far = cookie_token_with_exp(&user, now_ts() + 30 * 86_400);
        let req = Request::builder()
            .uri("/devices")
            .header(header::COOKIE, format!("access_token={far}"))
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::SET_COOKIE).is_none());
    }

    // Boundary 12: first config fetch generates the key.
    #[tokio::test]
    async fn ech_config_bootstraps_on_demand() {
        let (app, state, _dir) = setup();
        assert!(state.keystore.active_key().unwrap().is_none());

        let (status, _, body) = send(&app, get("/api/ech/config")).await;
        assert_eq!(status, StatusCode::OK);
        let list = body["data"]["echConfigList"].as_str().unwrap();
        assert!(!list.is_empty());
        assert!(state.keystore.active_key().unwrap().is_some());

        // Invariant 4: leading u16 equals remaining length.
        let raw = Base64::decode_vec(list).unwrap();
        let declared = u16::from_be_bytes([raw[0], raw[1]]) as usize;
        assert_eq!(declared, raw.len() - 2);
    }

    // S6: all three token spellings against check-auth.
    #[tokio::test]
    async fn check_auth_dual_mode() {
        let (app, state, _dir) = setup();
        let mut user = seed_user(&state, "s6@example.com");
        user.expired_at = now_ts() + 86_400;
        state.store.save_user(&user).unwrap();
        let (_, access_token, password) = seed_device(&state, &user, "udid-s6");
        let node = seed_slave(&state);

        let check = |token: String| {
            Request::builder()
                .method(Method::POST)
                .uri("/slave/device/check-auth")
                .header(header::AUTHORIZATION, basic_auth(&node.ipv4, &node.secret))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "udid": "udid-s6", "token": token }).to_string(),
                ))
                .unwrap()
        };

        // Password path.
        let (status, _, body) = send(&app, check(password.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["userID"], user.id);
        assert_eq!(body["data"]["udid"], "udid-s6");
        assert_eq!(body["data"]["serviceExpiredAt"], user.expired_at);

        // JWT path.
        let (status, _, _) = send(&app, check(access_token)).await;
        assert_eq!(status, StatusCode::OK);

        // Garbage.
        let (status, _, _) = send(&app, check("deadbeefdeadbeef".to_string())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn slave_surface_requires_node_credentials() {
        let (app, state, _dir) = setup();
        let node = seed_slave(&state);

        let (status, _, _) = send(&app, get("/slave/ech/keys")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/slave/ech/keys")
            .header(header::AUTHORIZATION, basic_auth(&node.ipv4, "wrong"))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        state.keystore.ensure_active(now_ts()).unwrap();
        let req = Request::builder()
            .uri("/slave/ech/keys")
            .header(header::AUTHORIZATION, basic_auth(&node.ipv4, &node.secret))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let keys = body["data"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["status"], "active");
        assert!(!keys[0]["privateKey"].as_str().unwrap().is_empty());
    }

    // Boundary 10: a device cannot delete itself.
    #[tokio::test]
    async fn deleting_current_device_is_rejected() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "del@example.com");
        let (_, token, _) = seed_device(&state, &user, "udid-keep");
        let (_, _, _other) = seed_device(&state, &user, "udid-other");

        let req = bearer(
            Request::builder()
                .method(Method::DELETE)
                .uri("/devices/udid-keep")
                .body(Body::empty())
                .unwrap(),
            &token,
        );
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = bearer(
            Request::builder()
                .method(Method::DELETE)
                .uri("/devices/udid-other")
                .body(Body::empty())
                .unwrap(),
            &token,
        );
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.store.device("udid-other").unwrap().is_none());
    }

    #[tokio::test]
    async fn relay_listing_shape() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "relay@example.com");
        let (_, token, _) = seed_device(&state, &user, "udid-r");
        let mut node = sample_node("3.3.3.3", "sin");
        state.store.save_node(&mut node).unwrap();
        let mut tunnel = sample_tunnel(TunnelProtocol::K2v5, node.id);
        state.store.save_tunnel(&mut tunnel).unwrap();
        let mut no_relay = sample_tunnel(TunnelProtocol::K2v5, node.id);
        no_relay.has_relay = false;
        state.store.save_tunnel(&mut no_relay).unwrap();

        let (status, _, body) = send(&app, bearer(get("/k2/relays"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        let relays = body["data"].as_array().unwrap();
        assert_eq!(relays.len(), 1);
        assert_eq!(relays[0]["id"], format!("relay-sin-{}", tunnel.id));
        assert_eq!(relays[0]["ipv4"], "3.3.3.3");
        assert_eq!(relays[0]["hopPortMin"], 20000);
    }

    #[tokio::test]
    async fn admin_routes_gate_on_admin_flag() {
        let (app, state, _dir) = setup();
        let user = seed_user(&state, "user@example.com");
        let (_, token, _) = seed_device(&state, &user, "udid-u");

        let uri = format!("/admin/users/{}/devices", user.uuid);
        let (status, _, _) = send(&app, bearer(get(&uri), &token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut admin = seed_user(&state, "root@example.com");
        admin.is_admin = true;
        state.store.save_user(&admin).unwrap();
        let (_, admin_token, _) = seed_device(&state, &admin, "udid-root");
        let (status, _, body) = send(&app, bearer(get(&uri), &admin_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn login_flow_with_test_mode_code() {
        let (app, state, _dir) = setup();

        // Device login issues tokens plus the derived password.
        let req = Request::builder()
            .method(Method::POST)
            .uri("/app/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "new@example.com", "code": "123456", "udid": "udid-n" })
                    .to_string(),
            ))
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let access = body["data"]["accessToken"].as_str().unwrap().to_string();
        assert!(!body["data"]["password"].as_str().unwrap().is_empty());
        assert!(state.store.device("udid-n").unwrap().is_some());

        // The minted token authenticates.
        let (status, _, _) = send(&app, bearer(get("/devices"), &access)).await;
        assert_eq!(status, StatusCode::OK);

        // Browser login sets both cookies.
        let req = Request::builder()
            .method(Method::POST)
            .uri("/app/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "new@example.com", "code": "123456" }).to_string(),
            ))
            .unwrap();
        let (status, headers, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let cookies: Vec<_> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with("access_token=")));
        assert!(cookies.iter().any(|c| c.starts_with("csrf_token=")));

        // Wrong code is a 401.
        let req = Request::builder()
            .method(Method::POST)
            .uri("/app/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "new@example.com", "code": "000000" }).to_string(),
            ))
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sni_resolution_over_http() {
        let (app, state, _dir) = setup();
        let node = seed_slave(&state);
        let mut wildcard = sample_tunnel(TunnelProtocol::K2v5, node.id);
        wildcard.domain = "*.edge.example.net".to_string();
        state.store.save_tunnel(&mut wildcard).unwrap();

        let req = Request::builder()
            .uri("/slave/resolve?domain=a.edge.example.net")
            .header(header::AUTHORIZATION, basic_auth(&node.ipv4, &node.secret))
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["id"], wildcard.id);

        let req = Request::builder()
            .uri("/slave/resolve?domain=edge.example.net")
            .header(header::AUTHORIZATION, basic_auth(&node.ipv4, &node.secret))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
