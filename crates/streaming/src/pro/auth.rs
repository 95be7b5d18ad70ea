//! API credentials and authentication frame signing
//!
//! The auth frame is `{"op": "auth", "args": [api_key, expires, signature]}`
//! where `signature = hex(HMAC-SHA256(secret, "GET/realtime" + expires))`
//! and `expires` is ten seconds in the future.

use crate::errors::{ExchangeError, Result};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use sriquant_core::{milliseconds, PerfTimer};
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const AUTH_PATH: &str = "GET/realtime";
const AUTH_EXPIRY_MS: u64 = 10_000;

/// API key pair
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    /// Load credentials from `SRIQUANT_API_KEY` / `SRIQUANT_API_SECRET`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("SRIQUANT_API_KEY")
            .map_err(|_| ExchangeError::MissingCredentials("SRIQUANT_API_KEY".to_string()))?;
        let secret = std::env::var("SRIQUANT_API_SECRET")
            .map_err(|_| ExchangeError::MissingCredentials("SRIQUANT_API_SECRET".to_string()))?;
        Ok(Self::new(api_key, secret))
    }

    pub fn is_valid(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }
}

/// Signs authentication frames
pub struct Signer {
    credentials: Credentials,
}

impl Signer {
    pub fn new(credentials: Credentials) -> Result<Self> {
        if !credentials.is_valid() {
            return Err(ExchangeError::MissingCredentials(
                "apiKey and secret are required".to_string(),
            ));
        }
        Ok(Self { credentials })
    }

    /// Hex HMAC-SHA256 of `payload` under the API secret
    pub fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|e| ExchangeError::SigningError(format!("HMAC setup failed: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Auth frame expiring `AUTH_EXPIRY_MS` after `now_ms`
    pub fn auth_frame_at(&self, now_ms: u64) -> Result<Value> {
        let _timer = PerfTimer::start("sign_auth_frame");
        let expires = (now_ms + AUTH_EXPIRY_MS).to_string();
        let signature = self.sign(&format!("{AUTH_PATH}{expires}"))?;
        debug!("🔐 Signed auth frame expiring at {}", expires);
        Ok(json!({
            "op": "auth",
            "args": [self.credentials.api_key, expires, signature],
        }))
    }

    pub fn auth_frame(&self) -> Result<Value> {
        self.auth_frame_at(milliseconds())
    }
}
