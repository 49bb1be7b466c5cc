//! Admission control for sensitive entry points.
//!
//! - [`rate_limiter`]: per-key token buckets with idle eviction
//! - [`key`]: per-call-type rate-limit key derivation
//! - [`sweeper`]: background eviction task

pub mod key;
pub mod rate_limiter;
pub mod sweeper;

pub use key::{AdmissionSubject, RateLimitKey};
pub use rate_limiter::{AdmissionControl, RateLimitConfig};

use crate::errors::ChatError;

/// Admit or reject a typed request.
///
/// # Errors
///
/// Returns `ChatError::RateLimited` when the caller's bucket is empty.
pub fn admit<T: AdmissionSubject>(
    admission: &AdmissionControl,
    request: &tonic::Request<T>,
) -> Result<(), ChatError> {
    let key = RateLimitKey::for_request(request);
    if admission.allow(&key.to_string()) {
        Ok(())
    } else {
        tracing::warn!(target: "chat.admission", key_kind = key.kind(), "Request rejected by admission control");
        Err(ChatError::RateLimited)
    }
}
