//! Error taxonomy for the gateway core.
//!
//! Variant names are the error *kinds* named by the component design, not an
//! attempt to mirror any particular upstream library's error shape.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway core errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream OIDC protocol or transport failure (C4). Verification and
    /// key-fetch errors are wrapped into this variant before reaching callers.
    #[error("OIDC error: {0}")]
    Oidc(String),

    /// JWKS retrieval failed (C2): discovery document missing `jwks_uri`,
    /// non-200 response, or transport failure.
    #[error("failed to fetch signing keys: {0}")]
    FetchKeys(String),

    /// The JWT header's `kid` has no match in the issuer's JWKS (C3).
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// The matched JWKS key's `alg` differs from the configured algorithm (C3).
    #[error("unknown or mismatched algorithm: {0}")]
    UnknownAlgorithm(String),

    /// Signature, audience, or expiry validation failed (C3).
    #[error("token verification failed: {0}")]
    VerifyToken(String),

    /// A required claim (`iss`, `kid`, ...) was absent (C3).
    #[error("missing claim: {0}")]
    MissingClaims(String),

    /// `iss` did not equal the configured issuer exactly (C3).
    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    /// Opaque `Token`/`AuthorizationCode` string did not parse (C1).
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Downstream `client_id` unknown or `client_secret` mismatch (C7).
    #[error("invalid client")]
    InvalidClient,

    /// Downstream authorization code missing, expired, or mismatched (C7).
    #[error("invalid grant")]
    InvalidGrant,

    /// `issue_code` called with an unregistered `client_id` (C7).
    #[error("unauthorized client: {0}")]
    UnauthorizedClient(String),

    /// Key-value or relational store failure not covered by a domain error.
    #[error("store error: {0}")]
    Store(String),

    /// Configuration load or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// AEAD envelope encryption/decryption or JWT signing failure.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Transport-level HTTP failure not already classified above.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        Self::VerifyToken(e.to_string())
    }
}
