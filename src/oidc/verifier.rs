//! OIDC verifier (C3): validates upstream ID tokens against a configured
//! issuer, audience, and algorithm, using the JWKS fetched by [`super::jwks`].

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;

use super::jwks::{JwksFetcher, JwksKey};
use crate::error::{Error, Result};

/// An upstream ID token after successful verification: the original encoded
/// form, the decoded claim map, and `jti` (defaulting to `"UNKNOWN"`).
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// The original `id_token` string as received.
    pub encoded: String,
    /// The decoded claim map.
    pub claims: serde_json::Map<String, Value>,
    /// The `jti` claim, or the literal `"UNKNOWN"` if absent.
    pub jti: String,
}

impl VerifiedToken {
    /// Fetch a string-valued claim.
    #[must_use]
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// Validates signed ID tokens from a single configured upstream issuer.
pub struct OidcVerifier {
    issuer: String,
    audience: String,
    algorithm: Algorithm,
    jwks: Arc<JwksFetcher>,
}

impl OidcVerifier {
    /// Build a verifier bound to `issuer`/`audience`/`algorithm`, resolving
    /// keys through `jwks`.
    #[must_use]
    pub fn new(issuer: String, audience: String, algorithm: Algorithm, jwks: Arc<JwksFetcher>) -> Self {
        Self {
            issuer,
            audience,
            algorithm,
            jwks,
        }
    }

    /// Verify `token`'s signature, issuer, audience, and expiry.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        let header = jsonwebtoken::decode_header(token).map_err(|e| Error::VerifyToken(e.to_string()))?;
        let kid = header.kid.ok_or_else(|| Error::MissingClaims("kid".into()))?;

        let unverified = extract_unverified_claims(token)?;
        let iss = unverified
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MissingClaims("iss".into()))?;
        if iss != self.issuer {
            return Err(Error::InvalidIssuer(iss.to_string()));
        }

        let decoding_key = match self.get_key(iss, &kid).await {
            Ok(key) => key,
            Err(e @ Error::UnknownKeyId(_)) => {
                // Tolerate key rotation: force a refetch once, then give up.
                self.jwks.invalidate(iss);
                match self.get_key(iss, &kid).await {
                    Ok(key) => key,
                    Err(_) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);

        let decoded = jsonwebtoken::decode::<serde_json::Map<String, Value>>(token, &decoding_key, &validation)
            .map_err(|e| {
                self.jwks.invalidate(iss);
                Error::VerifyToken(e.to_string())
            })?;

        let jti = decoded
            .claims
            .get("jti")
            .and_then(Value::as_str)
            .unwrap_or("UNKNOWN")
            .to_string();

        Ok(VerifiedToken {
            encoded: token.to_string(),
            claims: decoded.claims,
            jti,
        })
    }

    /// Resolve the PEM-equivalent decoding key for `(iss, kid)`.
    ///
    /// Linear-scans the issuer's JWKS for the matching `kid`, first match
    /// wins (duplicate `kid`s within one issuer's JWKS are a don't-care per
    /// design note: such an issuer is malformed either way).
    async fn get_key(&self, iss: &str, kid: &str) -> Result<DecodingKey> {
        let keys = self.jwks.get_keys(iss).await.map_err(|e| Error::FetchKeys(e.to_string()))?;
        find_key_in_jwks(&keys, kid, self.algorithm)
    }
}

fn find_key_in_jwks(keys: &[JwksKey], kid: &str, algorithm: Algorithm) -> Result<DecodingKey> {
    let key = keys
        .iter()
        .find(|k| k.kid == kid)
        .ok_or_else(|| Error::UnknownKeyId(kid.to_string()))?;

    if let Some(alg) = &key.alg {
        if algorithm_name(algorithm) != alg {
            return Err(Error::UnknownAlgorithm(alg.clone()));
        }
    }

    DecodingKey::from_rsa_components(&key.n, &key.e).map_err(|e| Error::VerifyToken(e.to_string()))
}

fn algorithm_name(alg: Algorithm) -> &'static str {
    match alg {
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        _ => "unsupported",
    }
}

/// Decode a JWT's payload without verifying its signature, to read `iss`
/// before the verifying key is known.
fn extract_unverified_claims(token: &str) -> Result<serde_json::Map<String, Value>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::VerifyToken("malformed JWT".into()));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| Error::VerifyToken(format!("invalid JWT payload encoding: {e}")))?;
    serde_json::from_slice(&payload).map_err(|e| Error::VerifyToken(format!("invalid JWT payload JSON: {e}")))
}
