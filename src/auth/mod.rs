//! Identity: tokens, verification codes, and request authentication.
//!
//! ## Layout
//!
//! - `claims` - JWT claim shapes and the resolved principal
//! - `tokens` - minting and validation (device / web-bearer / web-cookie)
//! - `codes` - one-shot verification codes with a send-lock
//! - `middleware` - per-request principal resolution, slave basic-auth
//! - `extract` - handler-side gates (`Auth`, `AdminOnly`, `SlaveAuth`, ...)
//! - `cors` - origin-gated CORS for the `/api` and `/app` surfaces

pub mod claims;
pub mod codes;
pub mod cors;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod tokens;

pub use claims::{AuthContext, TokenClaims, TokenType};
pub use codes::CodeService;
pub use error::AuthError;
pub use extract::{AdminOnly, Auth, DeviceAuth, OptionalAuth, ProOnly, RetailerOnly, SlaveAuth};
pub use tokens::{DeviceTokens, TokenService, WebTokens};
