//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`] types. Passwords arriving over gRPC, token signing
//! secrets loaded from the environment, and issued bearer tokens are all held
//! as [`SecretString`] so that `{:?}` and tracing fields print a redaction
//! marker instead of the value.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     email: String,
//!     password: SecretString,
//! }
//!
//! let creds = Credentials {
//!     email: "alice@example.com".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//! assert!(!format!("{creds:?}").contains("hunter2"));
//! assert_eq!(creds.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Byte length of a secret string, for minimum-strength checks without
/// copying the value out.
#[must_use]
pub fn secret_len(secret: &SecretString) -> usize {
    secret.expose_secret().len()
}
