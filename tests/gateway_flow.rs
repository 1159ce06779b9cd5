//! Exercises the child-token cache, issuer, and downstream OIDC service
//! together against the in-memory store implementations.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use serde_json::Value;

use token_gateway::cache::ChildTokenCache;
use token_gateway::clock::ManualClock;
use token_gateway::config::{DownstreamClient, DownstreamOidcConfig};
use token_gateway::downstream::DownstreamOidcService;
use token_gateway::error::Error;
use token_gateway::issuer::ChildTokenIssuer;
use token_gateway::store::memory::{InMemoryKeyValueStore, InMemoryRelationalStore};
use token_gateway::token::{Token, TokenData, TokenType, UserAttributes};

const TEST_RSA_PEM: &str = include_str!("fixtures/test_rsa_key.pem");

fn downstream_config() -> DownstreamOidcConfig {
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
        aead_keys: vec!["integration-test-aead-key".into()],
    }
}

async fn seed_session(kv: &InMemoryKeyValueStore, username: &str, now: chrono::DateTime<Utc>) -> (Token, TokenData) {
    let session_token = Token::generate();
    let data = TokenData {
        key: session_token.key().to_string(),
        username: username.to_string(),
        token_type: TokenType::Session,
        scopes: BTreeSet::from(["read:all".to_string(), "write:all".to_string()]),
        created: now,
        expires: now + chrono::Duration::hours(8),
        parent_key: None,
        service: None,
        attrs: UserAttributes {
            name: Some("Test User".into()),
            email: Some("test@example.com".into()),
            uid: Some("5001".into()),
            groups: vec!["users".into()],
        },
    };

    #[derive(serde::Serialize)]
    struct StoredToken<'a> {
        secret: &'a str,
        data: &'a TokenData,
    }
    let bytes = serde_json::to_vec(&StoredToken {
        secret: session_token.secret(),
        data: &data,
    })
    .unwrap();
    kv.set(&data.storage_key(), bytes, data.expires).await.unwrap();
    (session_token, data)
}

#[tokio::test]
async fn child_token_then_downstream_code_round_trip() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
    let relational = Arc::new(InMemoryRelationalStore::new());
    let issuer = Arc::new(ChildTokenIssuer::new(kv.clone(), relational.clone(), clock.clone(), StdDuration::from_secs(3600)));
    let cache = ChildTokenCache::new(issuer, clock.clone());
    let downstream = DownstreamOidcService::new(downstream_config(), kv.clone(), clock.clone()).unwrap();

    let (session_token, session_data) = seed_session(&kv, "alice", clock.now()).await;

    let scopes = BTreeSet::from(["read:all".to_string()]);
    let internal = cache.get_internal_token(&session_data, "svc-a", &scopes).await.unwrap();
    assert_eq!(internal.data.service.as_deref(), Some("svc-a"));
    assert_eq!(relational.token_count(), 1);

    let code = downstream.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();
    let signed = downstream
        .redeem_code("client-2", "client-2-secret", "https://example.com/", &code)
        .await
        .unwrap();

    assert_eq!(signed.claims.get("sub").and_then(Value::as_str), Some("alice"));
    assert_eq!(signed.claims.get("jti").and_then(Value::as_str), Some(code.key()));
    assert_eq!(signed.claims.get("uidNumber").and_then(Value::as_str), Some("5001"));

    // One-shot: redeeming the same code again fails.
    let err = downstream
        .redeem_code("client-2", "client-2-secret", "https://example.com/", &code)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidGrant));
}

#[tokio::test]
async fn issue_code_for_unregistered_client_is_rejected() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
    let downstream = DownstreamOidcService::new(downstream_config(), kv.clone(), clock.clone()).unwrap();
    let (session_token, _) = seed_session(&kv, "alice", clock.now()).await;

    let err = downstream.issue_code("unknown-client", "https://example.com/", &session_token).await.unwrap_err();
    assert!(matches!(err, Error::UnauthorizedClient(_)));
}

#[tokio::test]
async fn redeem_code_rejects_client_id_swap() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
    let downstream = DownstreamOidcService::new(downstream_config(), kv.clone(), clock.clone()).unwrap();
    let (session_token, _) = seed_session(&kv, "alice", clock.now()).await;

    let code = downstream.issue_code("client-2", "https://example.com/", &session_token).await.unwrap();
    let err = downstream
        .redeem_code("client-1", "client-1-secret", "https://example.com/", &code)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidGrant));
}

#[tokio::test]
async fn half_life_expiry_forces_reissue_across_full_stack() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
    let relational = Arc::new(InMemoryRelationalStore::new());
    let issuer = Arc::new(ChildTokenIssuer::new(kv.clone(), relational, clock.clone(), StdDuration::from_secs(3600)));
    let cache = ChildTokenCache::new(issuer, clock.clone());

    let (_session_token, session_data) = seed_session(&kv, "bob", clock.now()).await;
    let scopes = BTreeSet::from(["read:all".to_string()]);

    let first = cache.get_internal_token(&session_data, "svc-a", &scopes).await.unwrap();
    clock.advance(chrono::Duration::minutes(31));
    let second = cache.get_internal_token(&session_data, "svc-a", &scopes).await.unwrap();

    assert_ne!(first.data.key, second.data.key);
    assert!(second.data.expires - clock.now() > (second.data.expires - second.data.created) / 2);
}

#[tokio::test]
async fn per_user_serialization_yields_one_issuance_on_concurrent_miss() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
    let relational = Arc::new(InMemoryRelationalStore::new());
    let issuer = Arc::new(ChildTokenIssuer::new(kv.clone(), relational.clone(), clock.clone(), StdDuration::from_secs(3600)));
    let cache = Arc::new(ChildTokenCache::new(issuer, clock.clone()));

    let (_session_token, session_data) = seed_session(&kv, "carol", clock.now()).await;
    let session_data = Arc::new(session_data);
    let scopes = Arc::new(BTreeSet::from(["read:all".to_string()]));

    let mut handles = Vec::new();
    for _ in 0..12 {
        let cache = cache.clone();
        let session_data = session_data.clone();
        let scopes = scopes.clone();
        handles.push(tokio::spawn(async move {
            cache.get_internal_token(&session_data, "svc-a", &scopes).await.unwrap()
        }));
    }

    let mut keys = std::collections::HashSet::new();
    for handle in handles {
        keys.insert(handle.await.unwrap().data.key);
    }
    assert_eq!(keys.len(), 1);
    assert_eq!(relational.token_count(), 1);
    assert_eq!(relational.history_snapshot().len(), 1);
}
