//! Session token issuance and verification.
//!
//! Tokens are HMAC-signed JWTs. New tokens are signed with the active key and
//! carry its id in the `kid` header. Verification looks the `kid` up among all
//! configured keys, so tokens signed before a rotation stay valid until they
//! expire. Tokens with no `kid` verify against the legacy secret, if one is
//! configured.
//!
//! The key set is fixed at construction. Rotation happens by restarting with
//! a new active key while keeping the previous key in the set.

use crate::auth::claims::{Claims, TokenClaims};
use crate::config::Config;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::identity::normalize_identity;
use common::jwt::{inspect_header, validate_iat};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Errors from the token broker.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token failed verification. The message is deliberately generic.
    #[error("The access token is invalid or expired")]
    InvalidToken,

    /// Claims could not be built (e.g. empty identity).
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Signing failed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// Key set is inconsistent.
    #[error("Invalid signing key set: {0}")]
    KeySet(String),
}

/// Signing keys indexed by key id, plus the id used for new tokens.
pub struct SigningKeySet {
    keys: HashMap<String, SecretString>,
    active_key_id: String,
}

impl fmt::Debug for SigningKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&String> = self.keys.keys().collect();
        kids.sort();
        f.debug_struct("SigningKeySet")
            .field("key_ids", &kids)
            .field("active_key_id", &self.active_key_id)
            .finish()
    }
}

impl SigningKeySet {
    /// Build a key set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeySet` if the set is empty, a key id repeats, or
    /// `active_key_id` names no key.
    pub fn new(
        keys: impl IntoIterator<Item = (String, SecretString)>,
        active_key_id: &str,
    ) -> Result<Self, AuthError> {
        let mut map = HashMap::new();
        for (kid, secret) in keys {
            if map.insert(kid.clone(), secret).is_some() {
                return Err(AuthError::KeySet(format!("duplicate key id '{kid}'")));
            }
        }
        if map.is_empty() {
            return Err(AuthError::KeySet("no signing keys".to_string()));
        }
        if !map.contains_key(active_key_id) {
            return Err(AuthError::KeySet(format!(
                "active key id '{active_key_id}' is not configured"
            )));
        }
        Ok(Self {
            keys: map,
            active_key_id: active_key_id.to_string(),
        })
    }

    /// Id of the key used to sign new tokens.
    #[must_use]
    pub fn active_key_id(&self) -> &str {
        &self.active_key_id
    }

    fn active_secret(&self) -> Result<&SecretString, AuthError> {
        self.keys
            .get(&self.active_key_id)
            .ok_or_else(|| AuthError::KeySet("active key missing".to_string()))
    }

    fn get(&self, kid: &str) -> Option<&SecretString> {
        self.keys.get(kid)
    }
}

/// A freshly issued token.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies session tokens.
pub struct AuthBroker {
    keys: SigningKeySet,
    legacy_secret: Option<SecretString>,
    token_ttl: Duration,
    clock_skew: Duration,
}

impl fmt::Debug for AuthBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthBroker")
            .field("keys", &self.keys)
            .field("legacy_secret", &self.legacy_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_ttl", &self.token_ttl)
            .field("clock_skew", &self.clock_skew)
            .finish()
    }
}

impl AuthBroker {
    #[must_use]
    pub fn new(
        keys: SigningKeySet,
        legacy_secret: Option<SecretString>,
        token_ttl: Duration,
        clock_skew: Duration,
    ) -> Self {
        Self {
            keys,
            legacy_secret,
            token_ttl,
            clock_skew,
        }
    }

    /// Build a broker from service configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeySet` if the configured keys are inconsistent.
    pub fn from_config(config: &Config) -> Result<Self, AuthError> {
        let keys = SigningKeySet::new(
            config
                .signing_keys
                .iter()
                .map(|k| (k.kid.clone(), k.secret.clone())),
            &config.active_key_id,
        )?;
        Ok(Self::new(
            keys,
            config.legacy_secret.clone(),
            Duration::from_secs(config.token_ttl_seconds),
            Duration::from_secs(config.clock_skew_seconds),
        ))
    }

    /// Id of the key that signs new tokens.
    #[must_use]
    pub fn active_key_id(&self) -> &str {
        self.keys.active_key_id()
    }

    /// Issue a token for `identity`, signed with the active key.
    ///
    /// The identity is normalized before it is embedded.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClaims` for an empty identity and
    /// `AuthError::Signing` if encoding fails.
    #[instrument(skip_all, name = "chat.auth.issue")]
    pub fn issue(&self, subject_id: &str, identity: &str) -> Result<IssuedToken, AuthError> {
        let result = self.issue_at(subject_id, identity, Utc::now());
        metrics::record_token_issued(if result.is_ok() { "success" } else { "error" });
        result
    }

    fn issue_at(
        &self,
        subject_id: &str,
        identity: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            return Err(AuthError::InvalidClaims("identity is empty".to_string()));
        }

        let ttl = chrono::Duration::from_std(self.token_ttl)
            .map_err(|e| AuthError::InvalidClaims(format!("token ttl out of range: {e}")))?;
        let expires_at = now + ttl;

        let claims = TokenClaims {
            sub: subject_id.to_string(),
            email: identity,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.keys.active_key_id().to_string());

        let secret = self.keys.active_secret()?;
        let token = encode(
            &header,
            &claims,
            &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
        )
        .map_err(|e| {
            tracing::error!(target: "chat.auth", error = %e, "Failed to sign token");
            AuthError::Signing(e.to_string())
        })?;

        tracing::debug!(
            target: "chat.auth",
            kid = %self.keys.active_key_id(),
            expires_at = claims.exp,
            "Issued session token"
        );

        Ok(IssuedToken {
            token: SecretString::from(token),
            expires_at,
        })
    }

    /// Verify a token and return its claims with a normalized identity.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for any malformed, forged, expired or
    /// unknown-key token.
    #[instrument(skip_all, name = "chat.auth.verify")]
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let result = self.verify_inner(token);
        metrics::record_token_verification(if result.is_ok() { "success" } else { "error" });
        result
    }

    fn verify_inner(&self, token: &str) -> Result<Claims, AuthError> {
        let header = inspect_header(token).map_err(|_| AuthError::InvalidToken)?;

        let secret = match header.kid.as_deref() {
            Some(kid) => self.keys.get(kid).ok_or_else(|| {
                tracing::debug!(target: "chat.auth", kid = %kid, "Token signed with unknown key id");
                AuthError::InvalidToken
            })?,
            None => self.legacy_secret.as_ref().ok_or_else(|| {
                tracing::debug!(target: "chat.auth", "Token has no key id and no legacy secret is configured");
                AuthError::InvalidToken
            })?,
        };

        // Pin the HMAC family regardless of what the header claims.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(target: "chat.auth", error = %e, "Token verification failed");
            AuthError::InvalidToken
        })?;

        let claims = token_data.claims;
        validate_iat(claims.iat, self.clock_skew).map_err(|_| AuthError::InvalidToken)?;

        let identity = normalize_identity(&claims.email);
        if identity.is_empty() {
            tracing::debug!(target: "chat.auth", "Token carries an empty identity");
            return Err(AuthError::InvalidToken);
        }

        Ok(Claims {
            subject_id: claims.sub,
            identity,
            issued_at: claims.iat,
            expires_at: claims.exp,
            key_id: header.kid,
        })
    }
}
