//! Stored entity types.
//!
//! These are the rows persisted in the embedded database. Wire-facing
//! response shapes live next to their handlers in `api`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Current unix time in seconds.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Users & Devices
// ============================================================================

/// A human principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub uuid: String,
    pub email: String,
    /// Role bitmask carried into tokens so slaves need no DB lookup.
    pub roles: u64,
    /// Membership expiry (unix seconds).
    pub expired_at: i64,
    pub is_admin: bool,
    pub is_retailer: bool,
    /// Opaque static access key, unique when present.
    pub access_key: Option<String>,
    pub created_at: i64,
}

impl User {
    pub fn is_expired(&self) -> bool {
        self.expired_at <= now_ts()
    }
}

/// A unique (user, hardware-fingerprint) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Stable opaque identifier minted by the client.
    pub udid: String,
    pub user_id: u64,
    /// Token-issuance epoch. Any change invalidates all previously minted
    /// tokens for this device.
    pub token_issue_at: i64,
    pub last_used_at: i64,
    /// bcrypt hash of the derived device password; empty until first token
    /// issuance.
    pub password_hash: String,
    pub app_version: Option<String>,
    pub platform: Option<String>,
    pub arch: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub model: Option<String>,
    pub remark: Option<String>,
    pub created_at: i64,
}

impl Device {
    pub fn new(udid: impl Into<String>, user_id: u64) -> Self {
        let now = now_ts();
        Self {
            udid: udid.into(),
            user_id,
            token_issue_at: 0,
            last_used_at: now,
            password_hash: String::new(),
            app_version: None,
            platform: None,
            arch: None,
            os: None,
            os_version: None,
            model: None,
            remark: None,
            created_at: now,
        }
    }
}

// ============================================================================
// ECH keys
// ============================================================================

/// Lifecycle status of an ECH key.
///
/// Ordering matters: `active` sorts before `grace_period` in the
/// decryptable-keys listing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EchKeyStatus {
    Active,
    GracePeriod,
    Retired,
}

/// An ECH HPKE keypair and its serialized config.
///
/// `public_key`, `private_key` and `config` are encrypted at rest with the
/// process master key (see `ech::secretbox`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchKey {
    pub id: u64,
    /// Unique among non-retired keys, in [1, 255].
    pub config_id: u8,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub config: Vec<u8>,
    pub kem_id: u16,
    pub kdf_id: u16,
    pub aead_id: u16,
    pub status: EchKeyStatus,
    pub activated_at: i64,
    pub expires_at: i64,
    pub retired_at: Option<i64>,
}

// ============================================================================
// Tunnels & nodes
// ============================================================================

/// Logical tunnel protocol tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    K2,
    K2v4,
    K2wss,
    /// Front-door that detunnels ECH-wrapped ClientHellos and forwards
    /// non-ECH traffic to legacy back-ends.
    K2v5,
    K2oc,
}

impl TunnelProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelProtocol::K2 => "k2",
            TunnelProtocol::K2v4 => "k2v4",
            TunnelProtocol::K2wss => "k2wss",
            TunnelProtocol::K2v5 => "k2v5",
            TunnelProtocol::K2oc => "k2oc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "k2" => Some(TunnelProtocol::K2),
            "k2v4" => Some(TunnelProtocol::K2v4),
            "k2wss" => Some(TunnelProtocol::K2wss),
            "k2v5" => Some(TunnelProtocol::K2v5),
            "k2oc" => Some(TunnelProtocol::K2oc),
            _ => None,
        }
    }

    /// The set of stored protocols matching a query for `self`.
    ///
    /// The k2v5 front-door fans out to the legacy back-ends, so queries for
    /// `k2`, `k2v4` or `k2wss` also include `k2v5` rows. `k2v5` and `k2oc`
    /// queries are exact-match.
    pub fn query_protocols(self) -> Vec<TunnelProtocol> {
        match self {
            TunnelProtocol::K2 | TunnelProtocol::K2v4 | TunnelProtocol::K2wss => {
                vec![self, TunnelProtocol::K2v5]
            }
            TunnelProtocol::K2v5 | TunnelProtocol::K2oc => vec![self],
        }
    }

    /// Protocols included in the legacy (no protocol parameter) listing.
    /// `k2oc` is never part of it.
    pub fn legacy_protocols() -> Vec<TunnelProtocol> {
        vec![
            TunnelProtocol::K2,
            TunnelProtocol::K2v4,
            TunnelProtocol::K2wss,
            TunnelProtocol::K2v5,
        ]
    }
}

/// A relay endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveTunnel {
    pub id: u64,
    /// External domain; may carry a leading `*.` wildcard.
    pub domain: String,
    pub name: String,
    pub protocol: TunnelProtocol,
    pub port: u16,
    pub udp_port_min: Option<u16>,
    pub udp_port_max: Option<u16>,
    pub has_relay: bool,
    /// NULL is treated as TRUE when filtering.
    pub has_tunnel: Option<bool>,
    pub is_test: bool,
    /// Only meaningful for `k2v5`.
    pub server_url: Option<String>,
    pub node_id: u64,
}

/// A physical relay host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveNode {
    pub id: u64,
    pub ipv4: String,
    pub ipv6: Option<String>,
    pub region: String,
    pub country: String,
    pub name: String,
    /// Shared secret for basic-auth node-to-center calls.
    pub secret: String,
    pub load_percent: Option<f64>,
    pub traffic_usage_percent: Option<f64>,
    pub bandwidth_usage_percent: Option<f64>,
}

/// Billing mirror keyed by node IPv4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudInstance {
    pub ipv4: String,
    pub traffic_total_bytes: i64,
    pub traffic_used_bytes: i64,
    pub traffic_reset_at: Option<i64>,
    pub expires_at: Option<i64>,
}

// ============================================================================
// Wallet collaborators (thin CRUD, out-of-core)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Wallet {
    pub user_id: u64,
    /// Balance in cents.
    pub balance: i64,
    pub total_income: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletChange {
    pub id: u64,
    pub user_id: u64,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: String,
    pub remark: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WithdrawAccount {
    pub id: u64,
    pub user_id: u64,
    pub account_type: String,
    pub account_no: String,
    pub holder_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Withdraw {
    pub id: u64,
    pub user_id: u64,
    pub account_id: u64,
    pub amount: i64,
    pub status: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_aliasing_includes_k2v5_for_legacy_tags() {
        for p in [TunnelProtocol::K2, TunnelProtocol::K2v4, TunnelProtocol::K2wss] {
            let set = p.query_protocols();
            assert_eq!(set, vec![p, TunnelProtocol::K2v5]);
        }
        assert_eq!(
            TunnelProtocol::K2v5.query_protocols(),
            vec![TunnelProtocol::K2v5]
        );
        assert_eq!(
            TunnelProtocol::K2oc.query_protocols(),
            vec![TunnelProtocol::K2oc]
        );
    }

    #[test]
    fn legacy_listing_never_contains_k2oc() {
        assert!(!TunnelProtocol::legacy_protocols().contains(&TunnelProtocol::K2oc));
    }

    #[test]
    fn protocol_round_trips_through_str() {
        for p in [
            TunnelProtocol::K2,
            TunnelProtocol::K2v4,
            TunnelProtocol::K2wss,
            TunnelProtocol::K2v5,
            TunnelProtocol::K2oc,
        ] {
            assert_eq!(TunnelProtocol::parse(p.as_str()), Some(p));
        }
        assert_eq!(TunnelProtocol::parse("wireguard"), None);
    }

    #[test]
    fn ech_status_orders_active_first() {
        assert!(EchKeyStatus::Active < EchKeyStatus::GracePeriod);
        assert!(EchKeyStatus::GracePeriod < EchKeyStatus::Retired);
    }

    #[test]
    fn expired_membership_detected() {
        let mut user = User {
            id: 1,
            uuid: "u".into(),
            email: "a@b.c".into(),
            roles: 0,
            expired_at: now_ts() - 10,
            is_admin: false,
            is_retailer: false,
            access_key: None,
            created_at: 0,
        };
        assert!(user.is_expired());
        user.expired_at = now_ts() + 3600;
        assert!(!user.is_expired());
    }
}
