//! Common error types for chat components.

use thiserror::Error;

/// Errors raised by storage collaborators and shared infrastructure.
///
/// Service crates wrap this in their own error enums; the `Display` text is
/// for logs only and is never returned to clients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatCommonError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record already exists (e.g. duplicate email on registration)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using `ChatCommonError`
pub type Result<T> = std::result::Result<T, ChatCommonError>;
