//! Bearer-token signing and verification.
//!
//! The identity service (registration, login, password hashing) is
//! external; this server only signs fresh tokens on its behalf and
//! verifies the `token` cookie presented by clients and WebSocket
//! upgrades.

use axum::http::{HeaderMap, header::COOKIE};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session tokens live half a day; the identity service hands out a longer
/// one right after registration.
pub const SESSION_TTL_HOURS: i64 = 12;
pub const REGISTRATION_TTL_HOURS: i64 = 18;

/// JWT claims carried by the `token` cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

#[derive(Clone)]
pub struct TokenManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user_id: &str, ttl_hours: i64) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(ttl_hours)).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn issue_session(&self, user_id: &str) -> Result<String, AuthError> {
        self.issue(user_id, SESSION_TTL_HOURS)
    }

    /// Verify a token and return the user id it carries.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        Ok(data.claims.sub)
    }
}

/// Extract the `token` cookie from a request's headers. Both the HTTP
/// middleware and the WebSocket upgrade read it from here.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| pair.trim().strip_prefix("token=").map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_issue_and_verify_roundtrip() {
        let tokens = TokenManager::new("test-secret-test-secret-test-secret");
        let token = tokens.issue_session("user-1").unwrap();
        assert_eq!(tokens.verify(&token).unwrap(), "user-1");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let tokens = TokenManager::new("test-secret-test-secret-test-secret");
        let other = TokenManager::new("another-secret-another-secret-yes");
        let token = tokens.issue_session("user-1").unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let tokens = TokenManager::new("test-secret-test-secret-test-secret");
        assert!(tokens.verify("not-a-token").is_err());
    }

    #[test]
    fn test_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; token=abc.def.ghi; lang=de"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def.ghi"));
    }

    #[test]
    fn test_missing_cookie() {
        let headers = HeaderMap::new();
        assert!(token_from_headers(&headers).is_none());
    }
}
