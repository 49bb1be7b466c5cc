//! Session token claims.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims as they appear in the signed token payload.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject: the user's account id.
    pub sub: String,
    /// Normalized email identity.
    pub email: String,
    /// Issued-at (Unix epoch seconds).
    pub iat: i64,
    /// Expiration (Unix epoch seconds).
    pub exp: i64,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("email", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .finish()
    }
}

/// Verified session claims handed to handlers.
///
/// `identity` is always in normalized form. `key_id` is `None` for tokens that
/// were verified against the legacy secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: String,
    pub identity: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub key_id: Option<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("subject_id", &"[REDACTED]")
            .field("identity", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("key_id", &self.key_id)
            .finish()
    }
}
