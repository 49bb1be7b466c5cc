//! Password hashing with bcrypt.

use crate::config::{MAX_BCRYPT_COST, MIN_BCRYPT_COST};
use crate::errors::ChatError;
use tracing::instrument;

/// Hash a password with bcrypt at the given cost.
///
/// # Errors
///
/// Returns `ChatError::Crypto` if the cost is outside the accepted range or
/// hashing fails.
#[instrument(skip_all)]
pub fn hash_password(password: &str, cost: u32) -> Result<String, ChatError> {
    if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&cost) {
        return Err(ChatError::Crypto(format!(
            "Invalid bcrypt cost: {cost} (must be {MIN_BCRYPT_COST}-{MAX_BCRYPT_COST})"
        )));
    }

    bcrypt::hash(password, cost)
        .map_err(|e| ChatError::Crypto(format!("Password hashing failed: {e}")))
}

/// Check a password against a stored bcrypt hash.
///
/// # Errors
///
/// Returns `ChatError::Crypto` if the stored hash is not a valid bcrypt hash.
#[instrument(skip_all)]
pub fn verify_password(password: &str, hash: &str) -> Result<bool, ChatError> {
    bcrypt::verify(password, hash)
        .map_err(|e| ChatError::Crypto(format!("Password verification failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse", MIN_BCRYPT_COST).unwrap();

        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("battery staple", &hash).unwrap());
    }

    #[test]
    fn test_hash_uses_requested_cost() {
        let hash = hash_password("pw", MIN_BCRYPT_COST).unwrap();
        let cost = hash.split('$').nth(2).unwrap();
        assert_eq!(cost, "10");
    }

    #[test]
    fn test_cost_out_of_range() {
        assert!(matches!(hash_password("pw", 4), Err(ChatError::Crypto(_))));
        assert!(matches!(hash_password("pw", 15), Err(ChatError::Crypto(_))));
    }

    #[test]
    fn test_verify_with_invalid_hash() {
        let err = verify_password("pw", "not-a-valid-hash").unwrap_err();
        assert!(matches!(err, ChatError::Crypto(msg) if msg.starts_with("Password verification failed:")));
    }
}
