//! Chat service error types.
//!
//! Every variant maps onto one gRPC status code. The `Display` text may carry
//! internal detail for logs; clients only ever see [`ChatError::client_message`].

use common::error::ChatCommonError;
use thiserror::Error;
use tonic::{Code, Status};

/// Chat service error type.
///
/// Maps to gRPC status codes:
/// - `Unauthenticated`: `UNAUTHENTICATED`
/// - `NotFound`: `NOT_FOUND`
/// - `RateLimited`: `RESOURCE_EXHAUSTED`
/// - `AlreadyExists`: `ALREADY_EXISTS`
/// - `InvalidCredentials`: `PERMISSION_DENIED`
/// - `InvalidArgument`: `INVALID_ARGUMENT`
/// - `Evicted`: `UNAVAILABLE`
/// - Storage, Crypto, Transport, Config, Internal: `INTERNAL`
#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing, malformed, expired or forged credential.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Referenced user does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Admission control rejected the call.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Account already registered.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Password did not match the stored hash.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Request failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Persistence collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Token signing or password hashing failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The connection was dropped from the registry after a failed delivery.
    #[error("Connection evicted")]
    Evicted,

    /// The caller's own stream could not be written to.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// gRPC status code for this error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            ChatError::Unauthenticated => Code::Unauthenticated,
            ChatError::NotFound(_) => Code::NotFound,
            ChatError::RateLimited => Code::ResourceExhausted,
            ChatError::AlreadyExists(_) => Code::AlreadyExists,
            ChatError::InvalidCredentials => Code::PermissionDenied,
            ChatError::InvalidArgument(_) => Code::InvalidArgument,
            ChatError::Evicted => Code::Unavailable,
            ChatError::Storage(_)
            | ChatError::Crypto(_)
            | ChatError::Transport(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => Code::Internal,
        }
    }

    /// Client-safe message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Unauthenticated => "Authentication required".to_string(),
            ChatError::NotFound(_) => "User not found".to_string(),
            ChatError::RateLimited => "Too many requests, please retry later".to_string(),
            ChatError::AlreadyExists(_) => "User already exists".to_string(),
            ChatError::InvalidCredentials => "Invalid credentials".to_string(),
            ChatError::InvalidArgument(msg) => msg.clone(),
            ChatError::Evicted => "Connection lagging, please reconnect".to_string(),
            ChatError::Storage(_)
            | ChatError::Crypto(_)
            | ChatError::Transport(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<ChatError> for Status {
    fn from(err: ChatError) -> Self {
        Status::new(err.code(), err.client_message())
    }
}

impl From<ChatCommonError> for ChatError {
    fn from(err: ChatCommonError) -> Self {
        match err {
            ChatCommonError::AlreadyExists(msg) => ChatError::AlreadyExists(msg),
            ChatCommonError::NotFound(msg) => ChatError::NotFound(msg),
            ChatCommonError::Configuration(msg) => ChatError::Config(msg),
            ChatCommonError::Storage(msg) => ChatError::Storage(msg),
            ChatCommonError::Internal(msg) => ChatError::Internal(msg),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ChatError::Unauthenticated.code(), Code::Unauthenticated);
        assert_eq!(ChatError::NotFound("x".into()).code(), Code::NotFound);
        assert_eq!(ChatError::RateLimited.code(), Code::ResourceExhausted);
        assert_eq!(ChatError::AlreadyExists("x".into()).code(), Code::AlreadyExists);
        assert_eq!(ChatError::InvalidCredentials.code(), Code::PermissionDenied);
        assert_eq!(
            ChatError::InvalidArgument("x".into()).code(),
            Code::InvalidArgument
        );
        assert_eq!(ChatError::Storage("x".into()).code(), Code::Internal);
        assert_eq!(ChatError::Transport("x".into()).code(), Code::Internal);
        assert_eq!(ChatError::Evicted.code(), Code::Unavailable);
    }

    #[test]
    fn test_internal_details_not_exposed() {
        let status: Status = ChatError::Storage("connection refused on 10.0.0.5".into()).into();

        assert_eq!(status.code(), Code::Internal);
        assert!(!status.message().contains("10.0.0.5"));
        assert_eq!(status.message(), "An internal error occurred");
    }

    #[test]
    fn test_not_found_hides_identity() {
        let status: Status = ChatError::NotFound("bob@example.com".into()).into();

        assert_eq!(status.code(), Code::NotFound);
        assert!(!status.message().contains("bob@example.com"));
    }

    #[test]
    fn test_invalid_argument_message_passes_through() {
        let status: Status = ChatError::InvalidArgument("Email is required".into()).into();
        assert_eq!(status.message(), "Email is required");
    }

    #[test]
    fn test_from_common_error() {
        assert!(matches!(
            ChatError::from(ChatCommonError::AlreadyExists("a".into())),
            ChatError::AlreadyExists(_)
        ));
        assert!(matches!(
            ChatError::from(ChatCommonError::Storage("a".into())),
            ChatError::Storage(_)
        ));
        assert!(matches!(
            ChatError::from(ChatCommonError::NotFound("a".into())),
            ChatError::NotFound(_)
        ));
    }
}
