//! One-shot verification codes.
//!
//! Codes live in the TTL cache under `auth:code:email:<id>` for 5 minutes.
//! Sending is throttled by a 60-second non-blocking send-lock under
//! `auth:lock:email:<id>`; a held lock surfaces as `TooManyRequests`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use subtle::ConstantTimeEq;

use crate::cache::TtlCache;
use crate::error::ApiError;

const CODE_TTL: Duration = Duration::from_secs(300);
const LOCK_TTL: Duration = Duration::from_secs(60);

/// Fixed code returned in test mode.
pub const TEST_MODE_CODE: &str = "123456";

pub struct CodeService {
    cache: Arc<TtlCache>,
    test_mode: bool,
}

impl CodeService {
    pub fn new(cache: Arc<TtlCache>, test_mode: bool) -> Self {
        Self { cache, test_mode }
    }

    /// Generate and cache a code for a channel. Returns the code for the
    /// caller to deliver.
    pub fn send_code(&self, channel_id: &str) -> Result<String, ApiError> {
        if self.test_mode {
            return Ok(TEST_MODE_CODE.to_string());
        }
        if !self.cache.set_nx(&lock_key(channel_id), "1", LOCK_TTL) {
            return Err(ApiError::too_many_requests(
                "verification code already sent, retry later",
            ));
        }
        let code = generate_code();
        self.cache.set(&code_key(channel_id), &code, CODE_TTL);
        Ok(code)
    }

    /// Like `send_code`, but memoizes the code under a stable key so retries
    /// within the TTL see the same code. Still subject to the send-lock.
    pub fn send_code_stable(&self, channel_id: &str, stable_key: &str) -> Result<String, ApiError> {
        if self.test_mode {
            return Ok(TEST_MODE_CODE.to_string());
        }
        if !self.cache.set_nx(&lock_key(channel_id), "1", LOCK_TTL) {
            return Err(ApiError::too_many_requests(
                "verification code already sent, retry later",
            ));
        }
        let memo = format!("auth:code:stable:{stable_key}");
        let code = match self.cache.get(&memo) {
            Some(code) => code,
            None => {
                let code = generate_code();
                self.cache.set(&memo, &code, CODE_TTL);
                code
            }
        };
        self.cache.set(&code_key(channel_id), &code, CODE_TTL);
        Ok(code)
    }

    /// Constant-time check against the cached code. Consumes the code on
    /// success.
    pub fn verify_code(&self, channel_id: &str, supplied: &str) -> bool {
        if self.test_mode {
            return bool::from(supplied.as_bytes().ct_eq(TEST_MODE_CODE.as_bytes()));
        }
        let Some(expected) = self.cache.get(&code_key(channel_id)) else {
            return false;
        };
        if supplied.len() != expected.len() {
            return false;
        }
        let matched = bool::from(supplied.as_bytes().ct_eq(expected.as_bytes()));
        if matched {
            self.cache.delete(&code_key(channel_id));
        }
        matched
    }
}

fn code_key(channel_id: &str) -> String {
    format!("auth:code:email:{channel_id}")
}

fn lock_key(channel_id: &str) -> String {
    format!("auth:lock:email:{channel_id}")
}

fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}
