//! Builders for hand-crafted tokens.
//!
//! The service only mints tokens signed with its active key. These builders
//! produce the tokens it must also handle: legacy tokens without `kid`,
//! tokens from retired keys, other HMAC algorithms, expired or
//! future-dated claims.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;

/// Builder for signed test tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_identity("alice@example.com")
///     .with_kid("2024-01")
///     .expires_in(60)
///     .sign(SECRET);
/// ```
pub struct TestTokenBuilder {
    sub: String,
    email: String,
    iat: i64,
    exp: i64,
    kid: Option<String>,
    algorithm: Algorithm,
}

impl TestTokenBuilder {
    /// Defaults: fresh `iat`, one hour lifetime, HS256, no `kid`.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: uuid::Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            kid: None,
            algorithm: Algorithm::HS256,
        }
    }

    pub fn for_identity(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    pub fn with_subject(mut self, sub: &str) -> Self {
        self.sub = sub.to_string();
        self
    }

    pub fn with_kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Expiry relative to now. Negative values produce expired tokens.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Claims as JSON.
    pub fn claims(&self) -> serde_json::Value {
        json!({
            "sub": self.sub,
            "email": self.email,
            "iat": self.iat,
            "exp": self.exp,
        })
    }

    /// Sign with an HMAC secret.
    pub fn sign(self, secret: &str) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = self.kid.clone();
        encode(
            &header,
            &self.claims(),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("test token signing should succeed")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_kid_header() {
        let token = TestTokenBuilder::new()
            .with_kid("k2")
            .sign("builder-secret-builder-secret-123");

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("k2"));
        assert_eq!(header.alg, Algorithm::HS256);
    }

    #[test]
    fn test_builder_without_kid() {
        let token = TestTokenBuilder::new()
            .with_algorithm(Algorithm::HS512)
            .sign("builder-secret-builder-secret-123");

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid, None);
        assert_eq!(header.alg, Algorithm::HS512);
    }
}
