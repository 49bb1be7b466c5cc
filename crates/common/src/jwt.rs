//! JWT helpers shared by chat components.
//!
//! These run before any signature work: a hard size limit, header inspection
//! to find the `kid` used for key lookup, and the `iat` skew check applied
//! after the signature has been verified.
//!
//! All variants render the same client-facing message. The variant itself is
//! logged at debug level.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted token size in bytes (8KB).
///
/// Oversized tokens are rejected before base64 decoding or any HMAC work.
/// Typical chat tokens are well under 400 bytes.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `iat` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound on configurable clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors produced while inspecting or validating a token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a three-part JWT, or the header is not valid base64 JSON.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Header `alg` is missing or not one of the accepted HMAC algorithms.
    #[error("The access token is invalid or expired")]
    UnsupportedAlgorithm,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Header Inspection
// =============================================================================

/// The parts of a JWT header needed to choose a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Value of the `alg` field.
    pub alg: String,
    /// Value of the `kid` field. `None` for tokens minted before key ids
    /// were introduced; an empty string is treated the same as absent.
    pub kid: Option<String>,
}

/// HMAC algorithms accepted for chat tokens.
pub const ACCEPTED_ALGORITHMS: [&str; 3] = ["HS256", "HS384", "HS512"];

/// Decode the JWT header without verifying the signature.
///
/// The result is only suitable for key lookup. The token must still be
/// verified with the selected key.
///
/// # Errors
///
/// - `TokenTooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` if the structure, base64 or JSON is invalid
/// - `UnsupportedAlgorithm` if `alg` is not an HMAC algorithm
pub fn inspect_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .filter(|alg| ACCEPTED_ALGORITHMS.contains(alg))
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "Token rejected: unsupported algorithm");
            JwtValidationError::UnsupportedAlgorithm
        })?
        .to_string();

    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(TokenHeader { alg, kid })
}

// =============================================================================
// iat Validation
// =============================================================================

/// Reject tokens whose `iat` lies more than `clock_skew` in the future.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` when the check fails.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// [`validate_iat`] against an explicit `now`, for boundary tests.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
