//! API key request signing
//!
//! A request is authorised by three headers: an expiry timestamp, the hex
//! HMAC-SHA256 of `verb + path + expires + body` keyed by the API secret, and the
//! API key itself. The realtime socket signs `GET /realtime` with an empty body.

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

use super::errors::{ExchangeError, ExchangeResult};

type HmacSha256 = Hmac<Sha256>;

pub const EXPIRES_HEADER: &str = "api-expires";
pub const SIGNATURE_HEADER: &str = "api-signature";
pub const KEY_HEADER: &str = "api-key";

/// Path the realtime socket authenticates against
pub const REALTIME_PATH: &str = "/realtime";

/// API key and secret
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: SecretString,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// Sign a request expiring at `expires` (Unix seconds)
    pub fn sign(&self, method: &str, path: &str, expires: i64, body: &str) -> ExchangeResult<String> {
        sign(self.api_secret.expose_secret(), method, path, expires, body)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .finish()
    }
}

/// Hex HMAC-SHA256 of `method + path + expires + body`
pub fn sign(secret: &str, method: &str, path: &str, expires: i64, body: &str) -> ExchangeResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Signing(e.to_string()))?;
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(expires.to_string().as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Unix timestamp `validity` from now
pub fn generate_expires(validity: Duration) -> i64 {
    Utc::now().timestamp() + validity.as_secs() as i64
}

/// Header set for a signed request, as (name, value) pairs
pub fn signed_headers(
    credentials: &Credentials,
    method: &str,
    path: &str,
    body: &str,
    validity: Duration,
) -> ExchangeResult<Vec<(&'static str, String)>> {
    let expires = generate_expires(validity);
    let signature = credentials.sign(method, path, expires, body)?;

    Ok(vec![
        (EXPIRES_HEADER, expires.to_string()),
        (SIGNATURE_HEADER, signature),
        (KEY_HEADER, credentials.api_key.clone()),
    ])
}

/// Headers for the realtime socket; empty when the connection is unauthenticated
pub fn build_auth_headers(
    credentials: Option<&Credentials>,
    validity: Duration,
) -> ExchangeResult<Vec<(&'static str, String)>> {
    match credentials {
        Some(credentials) => signed_headers(credentials, "GET", REALTIME_PATH, "", validity),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_matches_documented_vector() {
        // Published example for the API key scheme
        let signature = sign(
            "chNOOS4KvNXR_Xq4k4c9qsfoKWvnDecLATCRlcBwyKDYnWgO",
            "GET",
            "/api/v1/instrument?filter=%7B%22symbol%22%3A+%22XBTM15%22%7D",
            1518064237,
            "",
        )
        .unwrap();
        assert_eq!(signature, "e2f422547eecb5b3cb29ade2127e21b858b235b386bfa45e1c1756eb3383919f");
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = sign("secret", "GET", "/realtime", 1700000000, "").unwrap();
        let b = sign("secret", "GET", "/realtime", 1700000000, "").unwrap();
        let c = sign("secret", "GET", "/realtime", 1700000001, "").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_auth_headers() {
        let credentials = Credentials::new("key-id", "secret");
        let before = Utc::now().timestamp();
        let headers = build_auth_headers(Some(&credentials), Duration::from_secs(300)).unwrap();

        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].0, EXPIRES_HEADER);
        assert_eq!(headers[1].0, SIGNATURE_HEADER);
        assert_eq!(headers[2], (KEY_HEADER, "key-id".to_string()));

        let expires: i64 = headers[0].1.parse().unwrap();
        assert!(expires >= before + 300);
        assert_eq!(headers[1].1, credentials.sign("GET", "/realtime", expires, "").unwrap());
    }

    #[test]
    fn test_no_headers_without_auth() {
        let headers = build_auth_headers(None, Duration::from_secs(300)).unwrap();
        assert!(headers.is_empty());
    }

    #[test]
    fn test_debug_hides_secret() {
        let credentials = Credentials::new("key-id", "super-secret");
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("key-id"));
        assert!(!printed.contains("super-secret"));
    }
}
