//! JWT claim shapes and the per-request principal.
//!
//! Claim names are a wire contract with deployed clients and slaves; they
//! must not be renamed.

use serde::{Deserialize, Serialize};

use crate::models::{Device, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// HS256-signed claims. `device_id` is empty for web-mode tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: u64,
    pub device_id: String,
    pub exp: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Issuance epoch of the device's current credentials. Must equal the
    /// device row's stored epoch at validation time.
    pub token_issue_at: i64,
    pub roles: u64,
}

impl TokenClaims {
    pub fn is_web(&self) -> bool {
        self.device_id.is_empty()
    }
}

/// Resolved principal, cached in request extensions by the authenticator.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    /// Present only for device-mode tokens.
    pub device: Option<Device>,
}

impl AuthContext {
    pub fn user_id(&self) -> u64 {
        self.user.id
    }

    pub fn udid(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.udid.as_str())
    }
}
