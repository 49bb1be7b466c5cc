//! Rate-limit key derivation.
//!
//! Calls that carry an account identity are limited per identity, which
//! protects one account against attempts spread over many source addresses.
//! Calls without one fall back to the caller's IP address.

use common::identity::normalize_identity;
use proto_gen::chat::{LoginRequest, RegisterRequest};
use std::fmt;
use std::net::IpAddr;

/// Request payloads that may name the account they act on.
pub trait AdmissionSubject {
    /// Identity-like field of the payload, if the call type has one.
    fn identity_hint(&self) -> Option<&str>;
}

impl AdmissionSubject for RegisterRequest {
    fn identity_hint(&self) -> Option<&str> {
        Some(&self.email)
    }
}

impl AdmissionSubject for LoginRequest {
    fn identity_hint(&self) -> Option<&str> {
        Some(&self.email)
    }
}

/// The key a call is rate-limited under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    Identity(String),
    Peer(IpAddr),
    Unknown,
}

impl RateLimitKey {
    /// Choose a key from an optional identity hint and the peer address.
    #[must_use]
    pub fn derive(identity_hint: Option<&str>, peer: Option<IpAddr>) -> Self {
        let identity = identity_hint.map(normalize_identity).filter(|s| !s.is_empty());
        match (identity, peer) {
            (Some(identity), _) => RateLimitKey::Identity(identity),
            (None, Some(ip)) => RateLimitKey::Peer(ip),
            (None, None) => RateLimitKey::Unknown,
        }
    }

    /// Derive the key for a typed gRPC request.
    #[must_use]
    pub fn for_request<T: AdmissionSubject>(request: &tonic::Request<T>) -> Self {
        Self::derive(
            request.get_ref().identity_hint(),
            request.remote_addr().map(|addr| addr.ip()),
        )
    }

    /// Label for logs and metrics that does not reveal the identity.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RateLimitKey::Identity(_) => "identity",
            RateLimitKey::Peer(_) => "peer",
            RateLimitKey::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Identity(identity) => write!(f, "email:{identity}"),
            RateLimitKey::Peer(ip) => write!(f, "addr:{ip}"),
            RateLimitKey::Unknown => write!(f, "unknown"),
        }
    }
}
