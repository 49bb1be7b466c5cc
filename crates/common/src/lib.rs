//! Common utilities and types shared across chat components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common data types
pub mod types;

/// Module for identity (email) normalization
pub mod identity;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limit, key id extraction, iat validation)
pub mod jwt;
