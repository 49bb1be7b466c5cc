//! Session tokens and credentials.
//!
//! - [`broker`]: issues and verifies HMAC session tokens with key rotation
//! - [`claims`]: token payload and verified claims
//! - [`password`]: bcrypt password hashing

pub mod broker;
pub mod claims;
pub mod password;

pub use broker::{AuthBroker, AuthError, IssuedToken, SigningKeySet};
pub use claims::Claims;

use crate::errors::ChatError;

impl From<AuthError> for ChatError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidToken => ChatError::Unauthenticated,
            AuthError::InvalidClaims(msg) => ChatError::InvalidArgument(msg),
            AuthError::Signing(msg) => ChatError::Crypto(msg),
            AuthError::KeySet(msg) => ChatError::Config(msg),
        }
    }
}
