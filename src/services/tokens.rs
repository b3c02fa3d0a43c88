//! Stateless signed-access tokens.
//!
//! A token grants time-boxed bearer access to exactly one storage key
//! without a server-side lookup table: validity is recomputable from the
//! token contents and the server secret. The flip side is that tokens
//! cannot be revoked before expiry; keep TTLs short.
//!
//! Wire format: URL-safe base64 over `storage_key|expiry_unix|mac_hex`,
//! where the MAC is HMAC-SHA256 over `storage_key|expiry_unix`.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("access token is malformed or has a bad signature")]
    Invalid,
    #[error("access token has expired")]
    Expired,
}

/// Mints and verifies signed-access tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: Vec<u8>,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac_for(&self, storage_key: &str, expires_at: i64) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(storage_key.as_bytes());
        mac.update(b"|");
        mac.update(expires_at.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Issue a token for `storage_key` valid for `ttl` from now.
    pub fn issue(&self, storage_key: &str, ttl: Duration) -> String {
        let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
        let sig = hex::encode(self.mac_for(storage_key, expires_at));
        let raw = format!("{}|{}|{}", storage_key, expires_at, sig);
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Verify a token, returning the storage key it grants access to.
    ///
    /// The MAC is checked (in constant time) before the expiry, so a
    /// tampered token is always `Invalid` even when it is also stale.
    pub fn verify(&self, token: &str) -> Result<String, TokenError> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::Invalid)?;
        let raw = String::from_utf8(decoded).map_err(|_| TokenError::Invalid)?;

        // Rightmost two fields are expiry and signature; the storage key
        // itself contains `/` but never `|`.
        let mut fields = raw.rsplitn(3, '|');
        let sig_hex = fields.next().ok_or(TokenError::Invalid)?;
        let expires_at = fields
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or(TokenError::Invalid)?;
        let storage_key = fields.next().ok_or(TokenError::Invalid)?;

        let sig = hex::decode(sig_hex).map_err(|_| TokenError::Invalid)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(storage_key.as_bytes());
        mac.update(b"|");
        mac.update(expires_at.to_string().as_bytes());
        mac.verify_slice(&sig).map_err(|_| TokenError::Invalid)?;

        if Utc::now().timestamp() > expires_at {
            return Err(TokenError::Expired);
        }

        Ok(storage_key.to_string())
    }
}
