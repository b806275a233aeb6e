//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup and is
//! immutable afterwards.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory for the embedded database | `/data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `JWT_SECRET` | HMAC-SHA256 signing secret for tokens | Required |
//! | `MASTER_KEY` | 32-byte hex key for at-rest key encryption | Required |
//! | `ACCESS_TOKEN_TTL_SECS` | Device/web access token lifetime | `604800` (7 d) |
//! | `REFRESH_TOKEN_TTL_SECS` | Refresh token lifetime | `2592000` (30 d) |
//! | `PUBLIC_CORS_ORIGINS` | Comma-separated origins allowed on `/app/*` | empty |
//! | `SLACK_WEBHOOK_URL` | Webhook for panic alerts | Optional |
//! | `VERIFY_CODE_TEST_MODE` | `1` returns a fixed verification code | off |
//! | `PRODUCTION` | `1` marks cookies `Secure` | off |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default device/web access token lifetime (7 days).
const DEFAULT_ACCESS_TTL_SECS: u64 = 7 * 24 * 3600;

/// Default refresh token lifetime (30 days).
const DEFAULT_REFRESH_TTL_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("{0} must be a 64-character hex string (32 bytes)")]
    BadMasterKey(&'static str),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Process-wide immutable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// HMAC-SHA256 secret for JWT signing.
    pub jwt_secret: String,
    /// At-rest encryption key for ECH key material.
    pub master_key: [u8; 32],
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Origins allowed to receive CORS headers on `/app/*`.
    pub public_cors_origins: Vec<String>,
    pub slack_webhook_url: Option<String>,
    /// When set, the verification-code service returns a fixed code.
    pub verify_code_test_mode: bool,
    /// Marks cookies `Secure`.
    pub production: bool,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
        let master_key_hex =
            env::var("MASTER_KEY").map_err(|_| ConfigError::Missing("MASTER_KEY"))?;
        let master_key = parse_master_key(&master_key_hex)?;

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid("PORT", raw))?,
            Err(_) => 8080,
        };

        let access_ttl = parse_secs("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?;
        let refresh_ttl = parse_secs("REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/data")),
            jwt_secret,
            master_key,
            access_token_ttl: Duration::from_secs(access_ttl),
            refresh_token_ttl: Duration::from_secs(refresh_ttl),
            public_cors_origins: env::var("PUBLIC_CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            slack_webhook_url: env::var("SLACK_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            verify_code_test_mode: flag("VERIFY_CODE_TEST_MODE"),
            production: flag("PRODUCTION"),
        })
    }
}

fn flag(name: &str) -> bool {
    matches!(env::var(name).as_deref(), Ok("1") | Ok("true"))
}

fn parse_secs(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

fn parse_master_key(raw: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = hex::decode(raw.trim()).map_err(|_| ConfigError::BadMasterKey("MASTER_KEY"))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| ConfigError::BadMasterKey("MASTER_KEY"))?;
    Ok(arr)
}
