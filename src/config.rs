//! Layered configuration: YAML file defaults overridden by environment
//! variables, loaded via `figment`. Durations are written as human-readable
//! strings (`"10s"`, `"1h"`); secrets support an `env:VAR_NAME` indirection
//! so they never need to live in plaintext in the config file.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration for the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Upstream OIDC provider the gateway authenticates users against.
    pub oidc_provider: OidcProviderConfig,
    /// Child-token lifetime policy (C5/C6).
    pub child_token: ChildTokenConfig,
    /// Downstream OIDC authorization-code service (C7).
    pub downstream_oidc: DownstreamOidcConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `path` (YAML), then apply `GATEWAY_`-prefixed
    /// environment variable overrides (double underscore as the nesting
    /// separator, e.g. `GATEWAY_OIDC_PROVIDER__CLIENT_ID`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("GATEWAY_").split("__"));
        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }
}

/// Upstream OIDC provider configuration (C4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcProviderConfig {
    /// Issuer URL, used both for discovery and `iss` claim validation.
    pub issuer: String,
    /// Our client id as registered with the provider.
    pub client_id: String,
    /// Our client secret. Supports `env:VAR_NAME` indirection.
    pub client_secret: String,
    /// Authorization endpoint.
    pub login_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Our callback URL, sent as `redirect_uri` both on the authorize
    /// redirect and at the token-endpoint exchange.
    pub redirect_uri: String,
    /// Extra scopes beyond the mandatory `openid`.
    pub scopes: Vec<String>,
    /// Extra authorize-redirect params; may override any default
    /// (`response_type`, `client_id`, `redirect_uri`, `scope`, `state`)
    /// except `response_type`.
    pub login_params: std::collections::HashMap<String, String>,
    /// Expected `aud` claim on verified ID tokens.
    pub audience: String,
    /// Expected JWT signing algorithm (`RS256`, ...).
    pub algorithm: String,
    /// Claim name supplying the local username.
    pub username_claim: String,
    /// Claim name supplying the numeric uid.
    pub uid_claim: String,
    /// HTTP client timeout for calls to this provider.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for OidcProviderConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            login_url: String::new(),
            token_url: String::new(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            login_params: std::collections::HashMap::new(),
            audience: String::new(),
            algorithm: "RS256".to_string(),
            username_claim: "uid".to_string(),
            uid_claim: "uidNumber".to_string(),
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl OidcProviderConfig {
    /// Resolve `client_secret`, following the `env:VAR_NAME` indirection if present.
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// Child-token lifetime policy (C5/C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildTokenConfig {
    /// Nominal lifetime of freshly issued internal/notebook tokens.
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,
}

impl Default for ChildTokenConfig {
    fn default() -> Self {
        Self {
            token_lifetime: Duration::from_secs(3600),
        }
    }
}

/// A relying party registered with the downstream OIDC service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamClient {
    /// The client's id.
    pub client_id: String,
    /// The client's secret. Supports `env:VAR_NAME` indirection.
    pub client_secret: String,
}

impl DownstreamClient {
    /// Resolve `client_secret`, following the `env:VAR_NAME` indirection if present.
    #[must_use]
    pub fn resolve_client_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// Downstream OIDC authorization-code service configuration (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamOidcConfig {
    /// `iss` claim on minted ID tokens.
    pub issuer: String,
    /// `aud` claim on minted ID tokens.
    pub audience: String,
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub code_lifetime: Duration,
    /// Minted ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,
    /// JWT signing algorithm for minted ID tokens.
    pub algorithm: String,
    /// PEM-encoded RSA private key used to sign ID tokens. Supports
    /// `env:VAR_NAME` indirection.
    pub signing_key_pem: String,
    /// `kid` advertised in minted ID token headers.
    pub signing_kid: String,
    /// Claim name carrying the username (mirrors the upstream provider's).
    pub username_claim: String,
    /// Claim name carrying the uid (mirrors the upstream provider's).
    pub uid_claim: String,
    /// Registered relying parties.
    pub clients: Vec<DownstreamClient>,
    /// AEAD keys for authorization-code envelope encryption, rotation-ordered
    /// (first is used for new encryptions; all are tried on decrypt). Each
    /// entry supports `env:VAR_NAME` indirection.
    pub aead_keys: Vec<String>,
}

impl Default for DownstreamOidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: String::new(),
            code_lifetime: Duration::from_secs(60),
            id_token_lifetime: Duration::from_secs(300),
            algorithm: "RS256".to_string(),
            signing_key_pem: String::new(),
            signing_kid: "default".to_string(),
            username_claim: "uid".to_string(),
            uid_claim: "uidNumber".to_string(),
            clients: Vec::new(),
            aead_keys: Vec::new(),
        }
    }
}

impl DownstreamOidcConfig {
    /// Resolve `signing_key_pem`, following the `env:VAR_NAME` indirection if present.
    #[must_use]
    pub fn resolve_signing_key_pem(&self) -> String {
        resolve_secret(&self.signing_key_pem)
    }

    /// Resolve every entry in `aead_keys`, following `env:VAR_NAME` indirection.
    #[must_use]
    pub fn resolve_aead_keys(&self) -> Vec<Vec<u8>> {
        self.aead_keys.iter().map(|k| resolve_secret(k).into_bytes()).collect()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` level filter (overridden by `RUST_LOG` if set).
    pub level: String,
    /// `"json"` for structured output, anything else for compact text.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Resolve a secret value, following the `env:VAR_NAME` indirection pattern:
/// a value of the literal form `env:FOO` is replaced by the contents of the
/// `FOO` environment variable (empty string if unset); any other value is
/// used as-is.
fn resolve_secret(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => value.to_string(),
    }
}

/// Custom humantime serde module for Duration.
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s").
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms").
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis).map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600)).map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60)).map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>().map(Duration::from_secs).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_lifetimes() {
        let cfg = Config::default();
        assert_eq!(cfg.child_token.token_lifetime, Duration::from_secs(3600));
        assert_eq!(cfg.downstream_oidc.code_lifetime, Duration::from_secs(60));
    }

    #[test]
    fn resolve_secret_passes_through_literal() {
        assert_eq!(resolve_secret("plain-value"), "plain-value");
    }

    #[test]
    fn resolve_secret_follows_env_indirection() {
        // SAFETY: test runs single-threaded with respect to this var name.
        unsafe { std::env::set_var("TOKEN_GATEWAY_TEST_SECRET", "resolved-value") };
        assert_eq!(resolve_secret("env:TOKEN_GATEWAY_TEST_SECRET"), "resolved-value");
        unsafe { std::env::remove_var("TOKEN_GATEWAY_TEST_SECRET") };
    }

    #[test]
    fn resolve_secret_missing_env_var_is_empty() {
        assert_eq!(resolve_secret("env:TOKEN_GATEWAY_DOES_NOT_EXIST"), "");
    }

    #[test]
    fn downstream_client_resolves_literal_secret() {
        let client = DownstreamClient {
            client_id: "c1".into(),
            client_secret: "literal".into(),
        };
        assert_eq!(client.resolve_client_secret(), "literal");
    }

    #[test]
    fn humantime_parses_hours_minutes_and_seconds() {
        #[derive(Deserialize)]
        struct Wrap(#[serde(with = "humantime_serde")] Duration);

        let one_hour: Wrap = serde_json::from_str("\"1h\"").unwrap();
        assert_eq!(one_hour.0, Duration::from_secs(3600));
        let thirty_min: Wrap = serde_json::from_str("\"30m\"").unwrap();
        assert_eq!(thirty_min.0, Duration::from_secs(1800));
    }
}
