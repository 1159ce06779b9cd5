//! Upstream OIDC provider driver (C4): builds the authorize redirect,
//! redeems the authorization code at the token endpoint, and returns
//! verified user info.

use std::sync::Arc;

use serde::Deserialize;
use url::Url;

use super::verifier::{OidcVerifier, VerifiedToken};
use crate::config::OidcProviderConfig;
use crate::error::{Error, Result};

/// User attributes extracted from a verified upstream ID token.
#[derive(Debug, Clone)]
pub struct TokenUserInfo {
    /// Local username, read from the configured `username_claim`.
    pub username: String,
    /// Numeric uid, read from the configured `uid_claim`.
    pub uid: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// The underlying verified ID token.
    pub id_token: VerifiedToken,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Drives authentication against a single configured upstream OIDC provider.
pub struct OidcProvider {
    config: OidcProviderConfig,
    http: reqwest::Client,
    verifier: Arc<OidcVerifier>,
}

impl OidcProvider {
    /// Build a provider bound to `config`, using `http` for the token-endpoint
    /// exchange and `verifier` to validate the returned ID token.
    #[must_use]
    pub fn new(config: OidcProviderConfig, http: reqwest::Client, verifier: Arc<OidcVerifier>) -> Self {
        Self { config, http, verifier }
    }

    /// Construct the authorization-endpoint redirect URL for `state`.
    ///
    /// `login_params` are merged over the defaults below and may override any
    /// of them except `response_type` — a collision replaces the default's
    /// value in place rather than appending a duplicate query parameter.
    pub fn redirect_url(&self, state: &str) -> Result<String> {
        let mut scope_parts = vec!["openid".to_string()];
        scope_parts.extend(self.config.scopes.iter().cloned());
        let scope = scope_parts.join(" ");

        let mut pairs: Vec<(String, String)> = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("redirect_uri".to_string(), self.redirect_uri()),
            ("scope".to_string(), scope),
            ("state".to_string(), state.to_string()),
        ];
        for (k, v) in &self.config.login_params {
            if k == "response_type" {
                continue;
            }
            match pairs.iter_mut().find(|(existing, _)| existing == k) {
                Some(entry) => entry.1 = v.clone(),
                None => pairs.push((k.clone(), v.clone())),
            }
        }

        let mut url = Url::parse(&self.config.login_url).map_err(|e| Error::Oidc(e.to_string()))?;
        {
            let mut params = url.query_pairs_mut();
            for (k, v) in &pairs {
                params.append_pair(k, v);
            }
        }
        Ok(url.to_string())
    }

    /// Redeem `code` at the token endpoint and return verified user info.
    pub async fn create_user_info(&self, code: &str) -> Result<TokenUserInfo> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", &self.config.resolve_client_secret()),
            ("code", code),
            ("redirect_uri", &self.redirect_uri()),
        ];

        let resp = self
            .http
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::Oidc(e.to_string()))?;

        let status = resp.status();
        let body_bytes = resp.bytes().await.map_err(|e| Error::Oidc(e.to_string()))?;
        let parsed: std::result::Result<TokenResponse, _> = serde_json::from_slice(&body_bytes);

        let body = match parsed {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(Error::Oidc(format!("token endpoint returned {status}")));
            }
            Err(_) => {
                return Err(Error::Oidc("response not valid JSON".to_string()));
            }
        };

        if !status.is_success() {
            if let Some(err) = &body.error {
                let desc = body.error_description.as_deref().unwrap_or("");
                return Err(Error::Oidc(format!("{err}: {desc}")));
            }
            return Err(Error::Oidc(format!("token endpoint returned {status}")));
        }

        let id_token = body.id_token.ok_or_else(|| Error::Oidc("response missing id_token".to_string()))?;

        let verified = self.verifier.verify(&id_token).await.map_err(|e| Error::Oidc(e.to_string()))?;

        let username = verified
            .claim_str(&self.config.username_claim)
            .ok_or_else(|| Error::Oidc(format!("missing claim {}", self.config.username_claim)))?
            .to_string();
        let uid = verified.claim_str(&self.config.uid_claim).map(str::to_string);
        let name = verified.claim_str("name").map(str::to_string);
        let email = verified.claim_str("email").map(str::to_string);

        Ok(TokenUserInfo {
            username,
            uid,
            name,
            email,
            id_token: verified,
        })
    }

    /// Invalidate local session state for a logged-out session.
    ///
    /// No-op: this provider's base OIDC protocol has no standard
    /// single-logout redirect, so this is purely a stable extension seam for
    /// callers — it never issues a network call.
    pub fn logout(&self, _session_username: &str) {}

    fn redirect_uri(&self) -> String {
        self.config.redirect_uri.clone()
    }
}
