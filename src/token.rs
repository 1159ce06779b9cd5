//! Opaque bearer credentials: the `(key, secret)` pair behind every session,
//! user, notebook, internal, and service token, plus the metadata record
//! attached to each key in the key-value store.

use std::collections::BTreeSet;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Length in bytes of the random material backing each half of a token.
/// 16 bytes -> 128 bits of entropy -> 22 base64url characters (no padding).
const HALF_LEN_BYTES: usize = 16;

/// Fixed prefix for session/user/internal/notebook tokens.
pub const TOKEN_PREFIX: &str = "gt-";
/// Fixed prefix for downstream authorization codes.
pub const CODE_PREFIX: &str = "gc-";

/// The kind of principal a [`TokenData`] record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Long-lived root credential established after upstream authentication.
    Session,
    /// User-issued credential (e.g. a personal access token).
    User,
    /// Short-lived child credential carrying the parent's scopes.
    Notebook,
    /// Short-lived child credential scoped to one downstream service.
    Internal,
    /// Credential minted for a non-interactive service principal.
    Service,
}

/// An opaque bearer credential: a `key` (the lookup handle, safe to log) and
/// a `secret` (never logged, never stored outside the canonical string).
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    key: String,
    secret: String,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("key", &self.key).field("secret", &"<redacted>").finish()
    }
}

impl Token {
    /// Mint a fresh token from a cryptographically secure random source.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            key: random_half(),
            secret: random_half(),
        }
    }

    /// Build a code-shaped token sharing the same `(key, secret)` invariants.
    #[must_use]
    pub fn generate_code() -> Self {
        Self::generate()
    }

    /// The lookup key. Safe to log; never sufficient on its own to authenticate.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The secret half. Must never be logged or persisted outside the canonical string.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Render the canonical `gt-<key>.<secret>` string form.
    #[must_use]
    pub fn to_canonical(&self) -> String {
        format!("{TOKEN_PREFIX}{}.{}", self.key, self.secret)
    }

    /// Render the canonical `gc-<key>.<secret>` authorization-code string form.
    #[must_use]
    pub fn to_code_canonical(&self) -> String {
        format!("{CODE_PREFIX}{}.{}", self.key, self.secret)
    }

    /// Parse a `gt-<key>.<secret>` string.
    pub fn parse(s: &str) -> Result<Self> {
        parse_with_prefix(s, TOKEN_PREFIX)
    }

    /// Parse a `gc-<key>.<secret>` authorization-code string.
    pub fn parse_code(s: &str) -> Result<Self> {
        parse_with_prefix(s, CODE_PREFIX)
    }

    /// Reconstruct a token from an already-generated `(key, secret)` pair,
    /// e.g. after reading both back out of a storage envelope.
    pub(crate) fn from_parts(key: String, secret: String) -> Self {
        Self { key, secret }
    }
}

fn random_half() -> String {
    let mut bytes = [0u8; HALF_LEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn parse_with_prefix(s: &str, prefix: &str) -> Result<Token> {
    let rest = s.strip_prefix(prefix).ok_or_else(|| Error::InvalidToken("missing prefix".into()))?;
    let (key, secret) = rest
        .split_once('.')
        .ok_or_else(|| Error::InvalidToken("missing '.' separator".into()))?;
    if key.is_empty() || secret.is_empty() {
        return Err(Error::InvalidToken("empty key or secret".into()));
    }
    if !is_url_safe_base64(key) || !is_url_safe_base64(secret) {
        return Err(Error::InvalidToken("non-base64 characters".into()));
    }
    Ok(Token {
        key: key.to_string(),
        secret: secret.to_string(),
    })
}

fn is_url_safe_base64(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// User attributes carried on every [`TokenData`] record, copied from parent
/// to child at issuance time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAttributes {
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Numeric UID claim.
    pub uid: Option<String>,
    /// Group memberships.
    pub groups: Vec<String>,
}

/// Metadata associated with a [`Token`] in the key-value store. Immutable
/// once created; deleted on expiry or explicit revocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenData {
    /// The token's lookup key (same as `Token::key`).
    pub key: String,
    /// Owning username.
    pub username: String,
    /// Kind of credential.
    pub token_type: TokenType,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// Creation timestamp (UTC, second precision).
    pub created: DateTime<Utc>,
    /// Expiry timestamp (UTC, second precision).
    pub expires: DateTime<Utc>,
    /// Parent token's key, if this is a child credential.
    pub parent_key: Option<String>,
    /// Downstream service this child is scoped to (internal tokens only).
    pub service: Option<String>,
    /// Copied user attributes.
    pub attrs: UserAttributes,
}

impl TokenData {
    /// The K/V store key this record is persisted under: `token:<key>`.
    #[must_use]
    pub fn storage_key(&self) -> String {
        storage_key_for(&self.key)
    }

    /// Whether this record has expired as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }
}

/// Build the `token:<key>` storage key for a given token key.
#[must_use]
pub fn storage_key_for(key: &str) -> String {
    format!("token:{key}")
}
