//! Identity normalization.
//!
//! An identity is an email address in canonical form: surrounding whitespace
//! trimmed and lower-cased. Every component that keys state by identity
//! (token claims, connection registry, rate limiter, stores) goes through
//! [`normalize_identity`] so that `Alice@Example.com ` and `alice@example.com`
//! always name the same user.

/// Return the canonical form of an email identity.
#[must_use]
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Cheap structural check used at the RPC boundary.
///
/// This is not full RFC 5322 validation; it rejects empty input and values
/// without a local part and domain separated by `@`.
#[must_use]
pub fn looks_like_email(identity: &str) -> bool {
    match identity.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}
