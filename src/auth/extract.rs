//! Axum extractors over the resolved principal.
//!
//! The authentication middleware puts the principal into request extensions;
//! these extractors just read and gate it:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(ctx): Auth) -> impl IntoResponse {
//!     // ctx.user is guaranteed present
//! }
//! ```

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;
use crate::models::{Device, SlaveNode, User};
use crate::state::AppState;

use super::claims::AuthContext;

/// Principal required.
pub struct Auth(pub AuthContext);

impl FromRequestParts<AppState> for Auth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Auth)
            .ok_or_else(ApiError::unauthenticated)
    }
}

/// Never aborts; `None` for anonymous requests.
pub struct OptionalAuth(pub Option<AuthContext>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<AuthContext>().cloned()))
    }
}

/// Principal plus a concrete device; rejects web-mode tokens.
pub struct DeviceAuth {
    pub user: User,
    pub device: Device,
}

impl FromRequestParts<AppState> for DeviceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(ApiError::unauthenticated)?;
        let device = ctx.device.ok_or_else(ApiError::unauthenticated)?;
        Ok(DeviceAuth {
            user: ctx.user,
            device,
        })
    }
}

/// Admin flag required.
pub struct AdminOnly(pub AuthContext);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(ApiError::unauthenticated)?;
        if !ctx.user.is_admin {
            return Err(ApiError::forbidden("admin required"));
        }
        Ok(AdminOnly(ctx))
    }
}

/// Retailer flag required.
pub struct RetailerOnly(pub AuthContext);

impl FromRequestParts<AppState> for RetailerOnly {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(ApiError::unauthenticated)?;
        if !ctx.user.is_retailer {
            return Err(ApiError::forbidden("retailer required"));
        }
        Ok(RetailerOnly(ctx))
    }
}

/// Live (non-expired) membership required.
pub struct ProOnly(pub AuthContext);

impl FromRequestParts<AppState> for ProOnly {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(ApiError::unauthenticated)?;
        if ctx.user.is_expired() {
            return Err(ApiError::membership_expired());
        }
        Ok(ProOnly(ctx))
    }
}

/// Slave node resolved by the basic-auth middleware.
pub struct SlaveAuth(pub SlaveNode);

impl FromRequestParts<AppState> for SlaveAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SlaveNode>()
            .cloned()
            .map(SlaveAuth)
            .ok_or_else(ApiError::invalid_credentials)
    }
}
