//! JWKS fetcher (C2): resolves an issuer's JWKS URI via OIDC discovery (with
//! a well-known fallback) and retrieves the issuer's public signing keys.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;

use crate::error::{Error, Result};

/// A single JSON Web Key as published in an issuer's JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksKey {
    /// Key id, matched against a JWT header's `kid`.
    pub kid: String,
    /// Signing algorithm this key is used with (e.g. `RS256`).
    pub alg: Option<String>,
    /// Base64url-encoded RSA public exponent.
    pub e: String,
    /// Base64url-encoded RSA public modulus.
    pub n: String,
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwksKey>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: Option<String>,
}

struct CachedKeys {
    keys: Vec<JwksKey>,
    fetched_at: DateTime<Utc>,
}

/// Fetches and optionally caches an issuer's JWKS keys.
///
/// Caching is an optimization, not a contract requirement (§4.2): entries
/// are keyed by issuer and invalidated either by TTL or by an explicit
/// [`JwksFetcher::invalidate`] call when a verifier hits an unknown `kid`,
/// so key rotation is tolerated without waiting out the TTL.
pub struct JwksFetcher {
    http: reqwest::Client,
    cache: DashMap<String, CachedKeys>,
    ttl: StdDuration,
}

impl JwksFetcher {
    /// Build a fetcher using `http` for discovery/JWKS requests, caching
    /// results per issuer for `ttl`.
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: StdDuration) -> Self {
        Self {
            http,
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Drop any cached keys for `issuer`, forcing the next `get_keys` call to
    /// refetch. Called on verification failure to tolerate key rotation.
    pub fn invalidate(&self, issuer: &str) {
        self.cache.remove(issuer);
    }

    /// Resolve `issuer`'s JWKS URI and return its keys verbatim.
    pub async fn get_keys(&self, issuer: &str) -> Result<Vec<JwksKey>> {
        if let Some(cached) = self.cache.get(issuer) {
            let age = Utc::now().signed_duration_since(cached.fetched_at);
            if age.num_seconds() >= 0 && (age.to_std().unwrap_or_default()) < self.ttl {
                return Ok(cached.keys.clone());
            }
        }

        let keys = self.fetch_keys(issuer).await?;
        self.cache.insert(
            issuer.to_string(),
            CachedKeys {
                keys: keys.clone(),
                fetched_at: Utc::now(),
            },
        );
        Ok(keys)
    }

    async fn fetch_keys(&self, issuer: &str) -> Result<Vec<JwksKey>> {
        let jwks_uri = self.resolve_jwks_uri(issuer).await?;
        let resp = self
            .http
            .get(&jwks_uri)
            .send()
            .await
            .map_err(|e| Error::FetchKeys(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::FetchKeys(format!("jwks endpoint returned {}", resp.status())));
        }
        let doc: JwksDocument = resp.json().await.map_err(|e| Error::FetchKeys(e.to_string()))?;
        Ok(doc.keys)
    }

    async fn resolve_jwks_uri(&self, issuer: &str) -> Result<String> {
        let discovery_url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));
        match self.http.get(&discovery_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let doc: DiscoveryDocument = resp.json().await.map_err(|e| Error::FetchKeys(e.to_string()))?;
                match doc.jwks_uri {
                    Some(uri) => Ok(uri),
                    // 200 but missing jwks_uri: misconfigured provider, do not fall back.
                    None => Err(Error::FetchKeys("discovery document missing jwks_uri".into())),
                }
            }
            // Non-200 or transport failure: fall back to the well-known JWKS path.
            _ => Ok(format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))),
        }
    }
}
