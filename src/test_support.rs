//! Shared fixtures for unit and router tests.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use crate::config::Config;
use crate::models::{EchKey, EchKeyStatus, SlaveNode, SlaveTunnel, TunnelProtocol};
use crate::state::AppState;
use crate::storage::Store;

/// Fresh store backed by a temp directory. Keep the `TempDir` alive for the
/// duration of the test.
pub fn open_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("center.redb")).expect("open store");
    (store, dir)
}

/// ECH key row with dummy (non-decryptable) blobs, for lifecycle tests that
/// never touch the crypto.
pub fn raw_ech_key(
    config_id: u8,
    status: EchKeyStatus,
    activated_at: i64,
    expires_at: i64,
) -> EchKey {
    EchKey {
        id: 0,
        config_id,
        public_key: vec![0xaa; 4],
        private_key: vec![0xbb; 4],
        config: vec![0xcc; 4],
        kem_id: crate::ech::wire::KEM_X25519_HKDF_SHA256,
        kdf_id: crate::ech::wire::KDF_HKDF_SHA256,
        aead_id: crate::ech::wire::AEAD_AES_128_GCM,
        status,
        activated_at,
        expires_at,
        retired_at: None,
    }
}

pub const TEST_JWT_SECRET: &str = "test-secret";

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: PathBuf::from("."),
        jwt_secret: TEST_JWT_SECRET.to_string(),
        master_key: [7u8; 32],
        access_token_ttl: Duration::from_secs(3600),
        refresh_token_ttl: Duration::from_secs(7200),
        public_cors_origins: vec!["https://dash.kaitu.example".to_string()],
        slack_webhook_url: None,
        verify_code_test_mode: true,
        production: false,
    }
}

/// Full application state over a fresh temp store.
pub fn test_state() -> (AppState, TempDir) {
    let (store, dir) = open_store();
    (AppState::new(test_config(), store), dir)
}

pub fn sample_node(ipv4: &str, region: &str) -> SlaveNode {
    SlaveNode {
        id: 0,
        ipv4: ipv4.to_string(),
        ipv6: None,
        region: region.to_string(),
        country: "US".to_string(),
        name: format!("node-{region}"),
        secret: "node-secret".to_string(),
        load_percent: Some(10.0),
        traffic_usage_percent: Some(20.0),
        bandwidth_usage_percent: Some(30.0),
    }
}

pub fn sample_tunnel(protocol: TunnelProtocol, node_id: u64) -> SlaveTunnel {
    SlaveTunnel {
        id: 0,
        domain: "t1.example.net".to_string(),
        name: "t1".to_string(),
        protocol,
        port: 443,
        udp_port_min: Some(20000),
        udp_port_max: Some(21000),
        has_relay: true,
        has_tunnel: Some(true),
        is_test: false,
        server_url: None,
        node_id,
    }
}
