//! Chat service configuration.
//!
//! Configuration is loaded from environment variables. Signing secrets are
//! held as `SecretString` and redacted in Debug output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{secret_len, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default gRPC bind address.
pub const DEFAULT_GRPC_BIND_ADDRESS: &str = "0.0.0.0:50051";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Key id used when only `JWT_SECRET` is configured.
pub const DEFAULT_KEY_ID: &str = "default";

/// Default session token lifetime (24 hours).
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 86_400;

/// Minimum HMAC secret length in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Default admission refill rate.
pub const DEFAULT_RATE_LIMIT_RPM: u32 = 20;

/// Default admission bucket capacity.
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 5;

/// Default idle window after which a rate-limit entry is swept (10 minutes).
pub const DEFAULT_RATE_LIMIT_IDLE_SECONDS: u64 = 600;

/// Default interval between rate-limit sweeps.
pub const DEFAULT_RATE_LIMIT_SWEEP_SECONDS: u64 = 60;

/// Default bcrypt cost factor.
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Minimum accepted bcrypt cost factor.
pub const MIN_BCRYPT_COST: u32 = 10;

/// Maximum accepted bcrypt cost factor.
pub const MAX_BCRYPT_COST: u32 = 14;

/// Default capacity of each stream's outbound channel.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 64;

/// One configured HMAC signing key.
#[derive(Clone)]
pub struct SigningKeyConfig {
    /// Key id stamped into the token header.
    pub kid: String,
    /// HMAC secret.
    pub secret: SecretString,
}

impl fmt::Debug for SigningKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyConfig")
            .field("kid", &self.kid)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Chat service configuration.
#[derive(Clone)]
pub struct Config {
    /// Signing keys, in the order they were configured.
    pub signing_keys: Vec<SigningKeyConfig>,

    /// Key id used to sign new tokens. Always names an entry of `signing_keys`.
    pub active_key_id: String,

    /// Secret used to verify tokens that carry no `kid` header.
    pub legacy_secret: Option<SecretString>,

    /// Lifetime of issued tokens in seconds.
    pub token_ttl_seconds: u64,

    /// Allowed `iat` clock skew in seconds.
    pub clock_skew_seconds: u64,

    /// bcrypt cost factor for new password hashes.
    pub bcrypt_cost: u32,

    /// Admission refill rate (tokens per minute).
    pub rate_limit_rpm: u32,

    /// Admission bucket capacity.
    pub rate_limit_burst: u32,

    /// Idle window after which rate-limit entries are swept.
    pub rate_limit_idle_seconds: u64,

    /// Interval between sweeps.
    pub rate_limit_sweep_seconds: u64,

    /// gRPC server bind address (default: "0.0.0.0:50051").
    pub grpc_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// PEM certificate path for TLS. Set together with `tls_key_path`.
    pub tls_cert_path: Option<String>,

    /// PEM private key path for TLS.
    pub tls_key_path: Option<String>,

    /// Capacity of each stream's outbound channel.
    pub stream_buffer_size: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("signing_keys", &self.signing_keys)
            .field("active_key_id", &self.active_key_id)
            .field(
                "legacy_secret",
                &self.legacy_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_ttl_seconds", &self.token_ttl_seconds)
            .field("clock_skew_seconds", &self.clock_skew_seconds)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("rate_limit_idle_seconds", &self.rate_limit_idle_seconds)
            .field("rate_limit_sweep_seconds", &self.rate_limit_sweep_seconds)
            .field("grpc_bind_address", &self.grpc_bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("tls_cert_path", &self.tls_cert_path)
            .field("tls_key_path", &self.tls_key_path)
            .field("stream_buffer_size", &self.stream_buffer_size)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwt_secret = vars
            .get("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        let (signing_keys, active_key_id, legacy_secret) =
            match vars.get("JWT_SIGNING_KEYS").filter(|s| !s.trim().is_empty()) {
                Some(list) => {
                    let keys = parse_signing_keys(list)?;
                    let active = vars
                        .get("JWT_ACTIVE_KEY_ID")
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .ok_or_else(|| ConfigError::MissingEnvVar("JWT_ACTIVE_KEY_ID".to_string()))?;
                    if !keys.iter().any(|k| k.kid == active) {
                        return Err(ConfigError::InvalidValue(format!(
                            "JWT_ACTIVE_KEY_ID '{active}' is not present in JWT_SIGNING_KEYS"
                        )));
                    }
                    (keys, active, jwt_secret)
                }
                None => {
                    let secret = jwt_secret.ok_or_else(|| {
                        ConfigError::MissingEnvVar("JWT_SECRET or JWT_SIGNING_KEYS".to_string())
                    })?;
                    let keys = vec![SigningKeyConfig {
                        kid: DEFAULT_KEY_ID.to_string(),
                        secret: secret.clone(),
                    }];
                    (keys, DEFAULT_KEY_ID.to_string(), Some(secret))
                }
            };

        for key in &signing_keys {
            check_secret_length(&format!("signing key '{}'", key.kid), &key.secret)?;
        }
        if let Some(secret) = &legacy_secret {
            check_secret_length("JWT_SECRET", secret)?;
        }

        let token_ttl_seconds = parse_or(vars, "JWT_TOKEN_TTL_SECONDS", DEFAULT_TOKEN_TTL_SECONDS)?;
        if token_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "JWT_TOKEN_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        let clock_skew_seconds =
            parse_or(vars, "JWT_CLOCK_SKEW_SECONDS", DEFAULT_CLOCK_SKEW.as_secs())?;
        if clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "JWT_CLOCK_SKEW_SECONDS must be at most {}, got {clock_skew_seconds}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        let bcrypt_cost = parse_or(vars, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue(format!(
                "BCRYPT_COST must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {bcrypt_cost}"
            )));
        }

        let rate_limit_rpm = parse_or(vars, "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;
        if rate_limit_rpm == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_RPM must be greater than 0".to_string(),
            ));
        }

        let rate_limit_burst = parse_or(vars, "RATE_LIMIT_BURST", DEFAULT_RATE_LIMIT_BURST)?;
        if rate_limit_burst == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_BURST must be greater than 0".to_string(),
            ));
        }

        let rate_limit_idle_seconds = parse_or(
            vars,
            "RATE_LIMIT_IDLE_SECONDS",
            DEFAULT_RATE_LIMIT_IDLE_SECONDS,
        )?;

        let rate_limit_sweep_seconds = parse_or(
            vars,
            "RATE_LIMIT_SWEEP_SECONDS",
            DEFAULT_RATE_LIMIT_SWEEP_SECONDS,
        )?;
        if rate_limit_sweep_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_SWEEP_SECONDS must be greater than 0".to_string(),
            ));
        }

        let grpc_bind_address = vars
            .get("GRPC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_GRPC_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let tls_cert_path = vars.get("TLS_CERT_PATH").filter(|s| !s.is_empty()).cloned();
        let tls_key_path = vars.get("TLS_KEY_PATH").filter(|s| !s.is_empty()).cloned();
        if tls_cert_path.is_some() != tls_key_path.is_some() {
            return Err(ConfigError::InvalidValue(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
            ));
        }

        let stream_buffer_size =
            parse_or(vars, "STREAM_BUFFER_SIZE", DEFAULT_STREAM_BUFFER_SIZE)?;
        if stream_buffer_size == 0 {
            return Err(ConfigError::InvalidValue(
                "STREAM_BUFFER_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(Config {
            signing_keys,
            active_key_id,
            legacy_secret,
            token_ttl_seconds,
            clock_skew_seconds,
            bcrypt_cost,
            rate_limit_rpm,
            rate_limit_burst,
            rate_limit_idle_seconds,
            rate_limit_sweep_seconds,
            grpc_bind_address,
            health_bind_address,
            tls_cert_path,
            tls_key_path,
            stream_buffer_size,
        })
    }

    /// Whether TLS material is configured.
    #[must_use]
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

/// Parse `kid:secret,kid:secret`.
fn parse_signing_keys(list: &str) -> Result<Vec<SigningKeyConfig>, ConfigError> {
    let mut keys: Vec<SigningKeyConfig> = Vec::new();

    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (kid, secret) = entry.split_once(':').ok_or_else(|| {
            ConfigError::InvalidValue(
                "JWT_SIGNING_KEYS entries must have the form kid:secret".to_string(),
            )
        })?;
        let kid = kid.trim();
        if kid.is_empty() {
            return Err(ConfigError::InvalidValue(
                "JWT_SIGNING_KEYS contains an empty key id".to_string(),
            ));
        }
        if keys.iter().any(|k| k.kid == kid) {
            return Err(ConfigError::InvalidValue(format!(
                "JWT_SIGNING_KEYS contains duplicate key id '{kid}'"
            )));
        }
        keys.push(SigningKeyConfig {
            kid: kid.to_string(),
            secret: SecretString::from(secret.to_string()),
        });
    }

    if keys.is_empty() {
        return Err(ConfigError::InvalidValue(
            "JWT_SIGNING_KEYS must contain at least one key".to_string(),
        ));
    }

    Ok(keys)
}

fn check_secret_length(name: &str, secret: &SecretString) -> Result<(), ConfigError> {
    let len = secret_len(secret);
    if len < MIN_SECRET_LENGTH {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be at least {MIN_SECRET_LENGTH} bytes, got {len}"
        )));
    }
    Ok(())
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} must be a valid number, got '{raw}'"))),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    const SECRET_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SECRET_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([("JWT_SECRET".to_string(), SECRET_A.to_string())])
    }

    #[test]
    fn test_from_vars_single_secret_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.signing_keys.len(), 1);
        assert_eq!(config.active_key_id, DEFAULT_KEY_ID);
        assert_eq!(
            config.legacy_secret.as_ref().unwrap().expose_secret(),
            SECRET_A
        );
        assert_eq!(config.token_ttl_seconds, DEFAULT_TOKEN_TTL_SECONDS);
        assert_eq!(config.clock_skew_seconds, 300);
        assert_eq!(config.bcrypt_cost, DEFAULT_BCRYPT_COST);
        assert_eq!(config.rate_limit_rpm, 20);
        assert_eq!(config.rate_limit_burst, 5);
        assert_eq!(config.rate_limit_idle_seconds, 600);
        assert_eq!(config.rate_limit_sweep_seconds, 60);
        assert_eq!(config.grpc_bind_address, DEFAULT_GRPC_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert!(!config.tls_enabled());
        assert_eq!(config.stream_buffer_size, DEFAULT_STREAM_BUFFER_SIZE);
    }

    #[test]
    fn test_from_vars_missing_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));
    }

    #[test]
    fn test_from_vars_short_secret_rejected() {
        let vars = HashMap::from([("JWT_SECRET".to_string(), "too-short".to_string())]);
        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(msg)) if msg.contains("32")));
    }

    #[test]
    fn test_from_vars_key_set() {
        let vars = HashMap::from([
            (
                "JWT_SIGNING_KEYS".to_string(),
                format!("k1:{SECRET_A}, k2:{SECRET_B}"),
            ),
            ("JWT_ACTIVE_KEY_ID".to_string(), "k2".to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.active_key_id, "k2");
        let kids: Vec<&str> = config.signing_keys.iter().map(|k| k.kid.as_str()).collect();
        assert_eq!(kids, vec!["k1", "k2"]);
        assert!(config.legacy_secret.is_none());
    }

    #[test]
    fn test_from_vars_key_set_with_legacy_secret() {
        let vars = HashMap::from([
            ("JWT_SIGNING_KEYS".to_string(), format!("k1:{SECRET_B}")),
            ("JWT_ACTIVE_KEY_ID".to_string(), "k1".to_string()),
            ("JWT_SECRET".to_string(), SECRET_A.to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.legacy_secret.as_ref().unwrap().expose_secret(),
            SECRET_A
        );
    }

    #[test]
    fn test_from_vars_secret_may_contain_colon() {
        let secret_with_colon = format!("{SECRET_A}:tail");
        let vars = HashMap::from([
            (
                "JWT_SIGNING_KEYS".to_string(),
                format!("k1:{secret_with_colon}"),
            ),
            ("JWT_ACTIVE_KEY_ID".to_string(), "k1".to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.signing_keys.first().unwrap().secret.expose_secret(),
            secret_with_colon
        );
    }

    #[test]
    fn test_from_vars_active_key_must_exist() {
        let vars = HashMap::from([
            ("JWT_SIGNING_KEYS".to_string(), format!("k1:{SECRET_A}")),
            ("JWT_ACTIVE_KEY_ID".to_string(), "k9".to_string()),
        ]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_active_key_required_with_key_set() {
        let vars = HashMap::from([("JWT_SIGNING_KEYS".to_string(), format!("k1:{SECRET_A}"))]);
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::MissingEnvVar(name)) if name == "JWT_ACTIVE_KEY_ID"
        ));
    }

    #[test]
    fn test_from_vars_key_set_malformed() {
        for list in ["no-colon", ":secret-without-kid", "k1:a,k1:b"] {
            let vars = HashMap::from([
                ("JWT_SIGNING_KEYS".to_string(), list.to_string()),
                ("JWT_ACTIVE_KEY_ID".to_string(), "k1".to_string()),
            ]);
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "expected rejection for {list}"
            );
        }
    }

    #[test]
    fn test_from_vars_rate_limit_must_be_positive() {
        let mut vars = base_vars();
        vars.insert("RATE_LIMIT_RPM".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        let mut vars = base_vars();
        vars.insert("RATE_LIMIT_BURST".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_non_numeric_rejected() {
        let mut vars = base_vars();
        vars.insert("RATE_LIMIT_RPM".to_string(), "lots".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_vars_bcrypt_cost_bounds() {
        let mut vars = base_vars();
        vars.insert("BCRYPT_COST".to_string(), "4".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("BCRYPT_COST".to_string(), "15".to_string());
        assert!(Config::from_vars(&vars).is_err());

        vars.insert("BCRYPT_COST".to_string(), "10".to_string());
        assert_eq!(Config::from_vars(&vars).unwrap().bcrypt_cost, 10);
    }

    #[test]
    fn test_from_vars_clock_skew_capped() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "601".to_string());
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_from_vars_tls_requires_both_paths() {
        let mut vars = base_vars();
        vars.insert("TLS_CERT_PATH".to_string(), "/etc/tls/cert.pem".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        vars.insert("TLS_KEY_PATH".to_string(), "/etc/tls/key.pem".to_string());
        assert!(Config::from_vars(&vars).unwrap().tls_enabled());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("GRPC_BIND_ADDRESS".to_string(), "127.0.0.1:6000".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains(SECRET_A));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("127.0.0.1:6000"));
    }
}
