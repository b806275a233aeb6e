//! Authentication failure taxonomy.
//!
//! Every credential failure except `MembershipExpired` collapses to the same
//! 401 response so callers cannot distinguish unknown device, wrong password,
//! revoked token, and so on.

use thiserror::Error;

use crate::error::ApiError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credentials presented")]
    Missing,

    #[error("malformed or unverifiable token")]
    InvalidToken,

    #[error("wrong token type")]
    WrongTokenType,

    #[error("token issuance epoch mismatch")]
    Revoked,

    #[error("unknown user")]
    UnknownUser,

    #[error("unknown device")]
    UnknownDevice,

    #[error("bad password")]
    BadPassword,

    #[error("membership expired")]
    MembershipExpired,

    #[error("store fault during auth: {0}")]
    Store(#[from] StoreError),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AuthError::InvalidToken
    }
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(_: bcrypt::BcryptError) -> Self {
        AuthError::BadPassword
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MembershipExpired => ApiError::membership_expired(),
            AuthError::Store(StoreError::NotFound(_)) => ApiError::invalid_credentials(),
            AuthError::Store(inner) => {
                tracing::error!(error = %inner, "auth store fault");
                ApiError::system("internal error")
            }
            _ => ApiError::invalid_credentials(),
        }
    }
}
