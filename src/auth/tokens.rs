//! Token minting and validation.
//!
//! Three issuance modes share one claim shape:
//!
//! | Mode       | `device_id` | access exp     | refresh |
//! |------------|-------------|----------------|---------|
//! | Device     | set         | config-driven  | yes     |
//! | Web-bearer | empty       | config-driven  | yes     |
//! | Web-cookie | empty       | 60 days        | no      |
//!
//! Device issuance bumps the device's `token_issue_at` epoch, which revokes
//! every previously minted token for that device in one row write. It also
//! derives a companion password `hex(md5(access_token))` and stores its
//! bcrypt hash on the device for the password-mode slave verifier.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use md5::{Digest, Md5};

use crate::models::{now_ts, Device, User};
use crate::storage::Store;

use super::claims::{AuthContext, TokenClaims, TokenType};
use super::error::AuthError;

/// Web-cookie tokens live this long; renewal keeps active sessions alive.
pub const COOKIE_TTL_SECS: i64 = 60 * 86_400;

/// A cookie token within this window of expiry gets re-minted on use.
pub const RENEWAL_WINDOW_SECS: i64 = 7 * 86_400;

/// Tokens minted for a device, plus the one-time-visible slave password.
pub struct DeviceTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// `hex(md5(access_token))`; shown once, stored only as a bcrypt hash.
    pub password: String,
}

pub struct WebTokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct TokenService {
    store: Arc<Store>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(store: Arc<Store>, secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            store,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Mint an access/refresh pair for a device, bumping its issuance epoch
    /// and storing the companion password hash in one device save.
    pub fn issue_device(&self, user: &User, device: &mut Device) -> Result<DeviceTokens, AuthError> {
        let now = now_ts();
        device.token_issue_at = now;

        let access_token = self.sign(TokenClaims {
            user_id: user.id,
            device_id: device.udid.clone(),
            exp: now + self.access_ttl.as_secs() as i64,
            token_type: TokenType::Access,
            token_issue_at: now,
            roles: user.roles,
        })?;
        let refresh_token = self.sign(TokenClaims {
            user_id: user.id,
            device_id: device.udid.clone(),
            exp: now + self.refresh_ttl.as_secs() as i64,
            token_type: TokenType::Refresh,
            token_issue_at: now,
            roles: user.roles,
        })?;

        let password = derive_password(&access_token);
        device.password_hash =
            bcrypt::hash(&password, bcrypt::DEFAULT_COST).map_err(AuthError::from)?;
        self.store.save_device(device)?;

        Ok(DeviceTokens {
            access_token,
            refresh_token,
            password,
        })
    }

    /// Mint a bearer pair for the dashboard. No device context.
    pub fn issue_web(&self, user: &User) -> Result<WebTokens, AuthError> {
        let now = now_ts();
        let access_token = self.sign(TokenClaims {
            user_id: user.id,
            device_id: String::new(),
            exp: now + self.access_ttl.as_secs() as i64,
            token_type: TokenType::Access,
            token_issue_at: now,
            roles: user.roles,
        })?;
        let refresh_token = self.sign(TokenClaims {
            user_id: user.id,
            device_id: String::new(),
            exp: now + self.refresh_ttl.as_secs() as i64,
            token_type: TokenType::Refresh,
            token_issue_at: now,
            roles: user.roles,
        })?;
        Ok(WebTokens {
            access_token,
            refresh_token,
        })
    }

    /// Mint a 60-day web-cookie token. Used both at login and for sliding
    /// renewal, which carries the same `user_id` and `roles` forward.
    pub fn issue_cookie(&self, user_id: u64, roles: u64) -> Result<String, AuthError> {
        let now = now_ts();
        self.sign(TokenClaims {
            user_id,
            device_id: String::new(),
            exp: now + COOKIE_TTL_SECS,
            token_type: TokenType::Access,
            token_issue_at: now,
            roles,
        })
    }

    /// Verify signature, expiry, and token type. Does not touch the store.
    pub fn validate(&self, token: &str, expected: TokenType) -> Result<TokenClaims, AuthError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &Validation::default())?;
        if data.claims.token_type != expected {
            return Err(AuthError::WrongTokenType);
        }
        Ok(data.claims)
    }

    /// Resolve validated claims to a principal.
    ///
    /// Device-mode claims require a device whose stored epoch equals
    /// `token_issue_at`; web-mode claims only require the user to exist.
    pub fn resolve(&self, claims: &TokenClaims) -> Result<AuthContext, AuthError> {
        if claims.is_web() {
            let user = self
                .store
                .user(claims.user_id)?
                .ok_or(AuthError::UnknownUser)?;
            return Ok(AuthContext { user, device: None });
        }

        let device = self
            .store
            .device(&claims.device_id)?
            .ok_or(AuthError::UnknownDevice)?;
        if device.user_id != claims.user_id {
            return Err(AuthError::UnknownDevice);
        }
        if device.token_issue_at != claims.token_issue_at {
            return Err(AuthError::Revoked);
        }
        let user = self
            .store
            .user(claims.user_id)?
            .ok_or(AuthError::UnknownUser)?;
        Ok(AuthContext {
            user,
            device: Some(device),
        })
    }

    /// Validate + resolve in one step.
    pub fn authenticate(&self, token: &str, expected: TokenType) -> Result<AuthContext, AuthError> {
        let claims = self.validate(token, expected)?;
        self.resolve(&claims)
    }

    /// Whether a cookie token is close enough to expiry to re-mint.
    pub fn needs_renewal(claims: &TokenClaims, now: i64) -> bool {
        claims.exp - now < RENEWAL_WINDOW_SECS
    }

    fn sign(&self, claims: TokenClaims) -> Result<String, AuthError> {
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

/// Slave-verifier companion password for an access token.
pub fn derive_password(access_token: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(access_token.as_bytes());
    hex::encode(hasher.finalize())
}
