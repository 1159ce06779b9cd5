//! Downstream OIDC authorization-code service (C7): issues and redeems
//! opaque, one-shot authorization codes bound to a session, and mints signed
//! ID tokens for relying parties.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subtle::ConstantTimeEq;

use super::crypto::{code_aad, CodeCipher};
use crate::clock::Clock;
use crate::config::DownstreamOidcConfig;
use crate::error::{Error, Result};
use crate::store::KeyValueStore;
use crate::token::{storage_key_for, Token, TokenData};

fn code_storage_key(code_key: &str) -> String {
    format!("oidc:{code_key}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CodeEnvelope {
    code_secret: String,
    client_id: String,
    redirect_uri: String,
    token_ref: String,
    created_at: DateTime<Utc>,
}

/// The data envelope persisted under `token:<key>` for any credential (this
/// mirrors [`crate::issuer`]'s `StoredToken`, but that type is private to its
/// module, so the downstream service reads the same wire shape directly).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    #[allow(dead_code)]
    secret: String,
    data: TokenData,
}

/// Minted downstream ID token, already signed.
#[derive(Debug, Clone)]
pub struct SignedIdToken {
    /// Compact JWT serialization.
    pub encoded: String,
    /// The claim set that was signed, for callers that want to inspect it
    /// without re-decoding.
    pub claims: serde_json::Map<String, Value>,
}

/// Acts as an OIDC provider for a fixed set of registered relying parties.
pub struct DownstreamOidcService {
    config: DownstreamOidcConfig,
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cipher: CodeCipher,
    encoding_key: EncodingKey,
    algorithm: Algorithm,
}

impl DownstreamOidcService {
    /// Build a service from `config`, deriving its AEAD cipher and JWT
    /// signing key from the configured secrets.
    pub fn new(config: DownstreamOidcConfig, kv: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        let cipher = CodeCipher::new(&config.resolve_aead_keys())?;
        let pem = config.resolve_signing_key_pem();
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| Error::Crypto(e.to_string()))?;
        let algorithm = parse_algorithm(&config.algorithm)?;
        Ok(Self {
            config,
            kv,
            clock,
            cipher,
            encoding_key,
            algorithm,
        })
    }

    /// Issue a fresh, one-shot authorization code bound to `session_token`,
    /// for the relying party `client_id`/`redirect_uri`.
    pub async fn issue_code(&self, client_id: &str, redirect_uri: &str, session_token: &Token) -> Result<Token> {
        if !self.config.clients.iter().any(|c| c.client_id == client_id) {
            return Err(Error::UnauthorizedClient(client_id.to_string()));
        }

        let code = Token::generate_code();
        let now = self.clock.now();
        let envelope = CodeEnvelope {
            code_secret: code.secret().to_string(),
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            token_ref: session_token.key().to_string(),
            created_at: now,
        };
        let plaintext = serde_json::to_vec(&envelope)?;
        let ciphertext = self.cipher.encrypt(&code_aad(code.key()), &plaintext)?;

        let lifetime = chrono::Duration::from_std(self.config.code_lifetime).unwrap_or_else(|_| chrono::Duration::seconds(60));
        self.kv.set(&code_storage_key(code.key()), ciphertext, now + lifetime).await?;

        Ok(code)
    }

    /// Redeem `code` for a signed ID token, authenticating the relying party
    /// with `client_id`/`client_secret` and checking `redirect_uri` matches
    /// what was used at issuance.
    pub async fn redeem_code(&self, client_id: &str, client_secret: &str, redirect_uri: &str, code: &Token) -> Result<SignedIdToken> {
        let client = self.config.clients.iter().find(|c| c.client_id == client_id).ok_or(Error::InvalidClient)?;
        if !secrets_match(client_secret, &client.resolve_client_secret()) {
            return Err(Error::InvalidClient);
        }

        let storage_key = code_storage_key(code.key());
        let ciphertext = self.kv.get(&storage_key).await?.ok_or(Error::InvalidGrant)?;

        let envelope = self.decode_envelope(code.key(), &ciphertext);
        // One-shot: the entry is consumed unconditionally past this point,
        // whether or not the envelope turns out to be valid.
        self.kv.delete(&storage_key).await?;
        let envelope = envelope?;

        if !secrets_match(code.secret(), &envelope.code_secret) {
            return Err(Error::InvalidGrant);
        }
        if envelope.client_id != client_id || envelope.redirect_uri != redirect_uri {
            return Err(Error::InvalidGrant);
        }

        let session = self.load_session(&envelope.token_ref).await?;
        let now = self.clock.now();
        if session.is_expired(now) {
            return Err(Error::InvalidGrant);
        }

        self.sign_id_token(code.key(), &session, now)
    }

    fn decode_envelope(&self, code_key: &str, ciphertext: &[u8]) -> Result<CodeEnvelope> {
        let plaintext = self.cipher.decrypt(&code_aad(code_key), ciphertext).map_err(|_| Error::InvalidGrant)?;
        serde_json::from_slice(&plaintext).map_err(|_| Error::InvalidGrant)
    }

    async fn load_session(&self, token_ref: &str) -> Result<TokenData> {
        let bytes = self.kv.get(&storage_key_for(token_ref)).await?.ok_or(Error::InvalidGrant)?;
        let stored: StoredToken = serde_json::from_slice(&bytes).map_err(|_| Error::InvalidGrant)?;
        Ok(stored.data)
    }

    fn sign_id_token(&self, code_key: &str, session: &TokenData, now: DateTime<Utc>) -> Result<SignedIdToken> {
        let lifetime = chrono::Duration::from_std(self.config.id_token_lifetime).unwrap_or_else(|_| chrono::Duration::seconds(300));
        let exp = now + lifetime;

        let mut claims = serde_json::Map::new();
        claims.insert("iss".into(), Value::String(self.config.issuer.clone()));
        claims.insert("aud".into(), Value::String(self.config.audience.clone()));
        claims.insert("iat".into(), Value::from(now.timestamp()));
        claims.insert("exp".into(), Value::from(exp.timestamp()));
        claims.insert("jti".into(), Value::String(code_key.to_string()));
        claims.insert("sub".into(), Value::String(session.username.clone()));
        claims.insert("preferred_username".into(), Value::String(session.username.clone()));
        claims.insert("scope".into(), Value::String("openid".into()));
        if let Some(name) = &session.attrs.name {
            claims.insert("name".into(), Value::String(name.clone()));
        }
        claims.insert(self.config.username_claim.clone(), Value::String(session.username.clone()));
        if let Some(uid) = &session.attrs.uid {
            claims.insert(self.config.uid_claim.clone(), Value::String(uid.clone()));
        }

        let mut header = Header::new(self.algorithm);
        header.kid = Some(self.config.signing_kid.clone());

        let encoded = jsonwebtoken::encode(&header, &claims, &self.encoding_key).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(SignedIdToken { encoded, claims })
    }
}

fn secrets_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name {
        "RS256" => Ok(Algorithm::RS256),
        "RS384" => Ok(Algorithm::RS384),
        "RS512" => Ok(Algorithm::RS512),
        other => Err(Error::Config(format!("unsupported signing algorithm: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::DownstreamClient;
    use crate::store::memory::InMemoryKeyValueStore;
    use crate::token::{TokenType, UserAttributes};
    use std::time::Duration as StdDuration;

    // 2048-bit RSA test key, PEM-encoded, used only for unit tests in this module.
    const TEST_RSA_PEM: &str = include_str!("../../tests/fixtures/test_rsa_key.pem");

    fn config() -> DownstreamOidcConfig {
        DownstreamOidcConfig {
            issuer: "https://gateway.example.com".into(),
            audience: "downstream-client".into(),
            code_lifetime: StdDuration::from_secs(60),
            id_token_lifetime: StdDuration::from_secs(300),
            algorithm: "RS256".into(),
            signing_key_pem: TEST_RSA_PEM.into(),
            signing_kid: "gateway-2026".into(),
            username_claim: "uid".into(),
            uid_claim: "uidNumber".into(),
            clients: vec![
                DownstreamClient {
                    client_id: "client-1".into(),
                    client_secret: "client-1-secret".into(),
                },
                DownstreamClient {
                    client_id: "client-2".into(),
                    client_secret: "client-2-secret".into(),
                },
            ],
            aead_keys: vec!["aead-key-material".into()],
        }
    }

    fn service(clock: Arc<ManualClock>) -> (DownstreamOidcService, Arc<InMemoryKeyValueStore>) {
        let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
        let service = DownstreamOidcService::new(config(), kv.clone(), clock).unwrap();
        (service, kv)
    }

    async fn seed_session(kv: &InMemoryKeyValueStore, now: DateTime<Utc>) -> Token {
        let session_token = Token::generate();
        let data = TokenData {
            key: session_token.key().to_string(),
            username: "alice".into(),
            token_type: TokenType::Session,
            scopes: Default::default(),
            created: now,
            expires: now + chrono::Duration::hours(8),
            parent_key: None,
            service: None,
            attrs: UserAttributes {
                name: Some("Alice Example".into()),
                email: Some("alice@example.com".into()),
                uid: Some("1234".into()),
                groups: vec![],
            },
        };
        let stored = StoredToken {
            secret: session_token.secret().to_string(),
            data: data.clone(),
        };
        let bytes = serde_json::to_vec(&stored).unwrap();
        kv.set(&data.storage_key(), bytes, data.expires).await.unwrap();
        session_token
    }

    #[tokio::test]
    async fn issue_code_rejects_unregistered_client() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (service, kv) = service(clock.clone());
        let session_token = seed_session(&kv, clock.now()).await;

        let err = service.issue_code("unknown", "https://example.com/", &session_token).await.unwrap_err();
        assert!(matches!(err, Error::UnauthorizedClient(_)));
    }

    #[tokio::test]
    async fn full_issue_then_redeem_round_trip() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (service, kv) = service(clock.clone());
        let session_token = seed_session(&kv, clock.now()).await;

        let code = service.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();
        let signed = service
            .redeem_code("client-2", "client-2-secret", "https://example.com/", &code)
            .await
            .unwrap();

        assert_eq!(signed.claims.get("sub").and_then(Value::as_str), Some("alice"));
        assert_eq!(signed.claims.get("preferred_username").and_then(Value::as_str), Some("alice"));
        assert_eq!(signed.claims.get("jti").and_then(Value::as_str), Some(code.key()));
        assert_eq!(signed.claims.get("uidNumber").and_then(Value::as_str), Some("1234"));
    }

    #[tokio::test]
    async fn redeem_code_is_one_shot() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (service, kv) = service(clock.clone());
        let session_token = seed_session(&kv, clock.now()).await;

        let code = service.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();
        service.redeem_code("client-2", "client-2-secret", "https://example.com/", &code).await.unwrap();

        let err = service.redeem_code("client-2", "client-2-secret", "https://example.com/", &code).await.unwrap_err();
        assert!(matches!(err, Error::InvalidGrant));
    }

    #[tokio::test]
    async fn redeem_code_rejects_wrong_client_secret() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (service, kv) = service(clock.clone());
        let session_token = seed_session(&kv, clock.now()).await;
        let code = service.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();

        let err = service.redeem_code("client-2", "wrong", "https://example.com/", &code).await.unwrap_err();
        assert!(matches!(err, Error::InvalidClient));
    }

    #[tokio::test]
    async fn redeem_code_rejects_wrong_client_id() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (service, kv) = service(clock.clone());
        let session_token = seed_session(&kv, clock.now()).await;
        let code = service.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();

        let err = service
            .redeem_code("client-1", "client-1-secret", "https://example.com/", &code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGrant));
    }

    #[tokio::test]
    async fn redeem_code_rejects_mismatched_redirect_uri() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (service, kv) = service(clock.clone());
        let session_token = seed_session(&kv, clock.now()).await;
        let code = service.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();

        let err = service
            .redeem_code("client-2", "client-2-secret", "https://foo.example.com/", &code)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGrant));
    }
}
