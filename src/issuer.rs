//! Child-token issuer (C6): mints internal and notebook tokens that do not
//! already exist in the relational store, persisting K/V, relational, and
//! history rows in that order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{Action, TokenChangeHistoryEntry};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::{ChildLookup, KeyValueStore, RelationalStore, TokenRecord};
use crate::token::{Token, TokenData, TokenType};

/// A freshly issued or reused child token: the bearer credential plus its
/// store metadata, bundled because minting produces both and reuse recovers
/// both (the secret is read back out of the K/V envelope, see
/// [`StoredToken`]).
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The bearer credential.
    pub token: Token,
    /// Its persisted metadata.
    pub data: TokenData,
    /// Whether this record was recovered from an existing relational/K-V
    /// entry rather than freshly minted. A caller fronting this issuer with
    /// its own cache should only cache a fresh result — a reused result was
    /// already cached by whichever call first minted it.
    pub reused: bool,
}

impl IssuedToken {
    /// Render the canonical `gt-<key>.<secret>` string.
    #[must_use]
    pub fn to_canonical(&self) -> String {
        self.token.to_canonical()
    }
}

/// The envelope actually written to the key-value store: [`TokenData`] plus
/// the secret half needed to reconstruct a usable [`Token`] on reuse.
/// `TokenData` alone (as named by the data model) never carries the secret,
/// since it is also used for read-only introspection paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    secret: String,
    data: TokenData,
}

/// Mints internal and notebook child tokens, consulting the relational store
/// for a reusable existing child before generating a new one.
pub struct ChildTokenIssuer {
    kv: Arc<dyn KeyValueStore>,
    relational: Arc<dyn RelationalStore>,
    clock: Arc<dyn Clock>,
    token_lifetime: StdDuration,
}

impl ChildTokenIssuer {
    /// Build an issuer backed by `kv`/`relational`, using `clock` for all
    /// timestamps and `token_lifetime` as the nominal lifetime of freshly
    /// minted children.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        relational: Arc<dyn RelationalStore>,
        clock: Arc<dyn Clock>,
        token_lifetime: StdDuration,
    ) -> Self {
        Self {
            kv,
            relational,
            clock,
            token_lifetime,
        }
    }

    /// Issue (or reuse) an internal token scoped to `service`/`scopes`,
    /// parented by `parent`.
    pub async fn issue_internal(&self, parent: &TokenData, service: &str, scopes: &BTreeSet<String>) -> Result<IssuedToken> {
        self.issue(parent, TokenType::Internal, Some(service), scopes.clone()).await
    }

    /// Issue (or reuse) a notebook token carrying `parent`'s own scopes.
    pub async fn issue_notebook(&self, parent: &TokenData) -> Result<IssuedToken> {
        self.issue(parent, TokenType::Notebook, None, parent.scopes.clone()).await
    }

    /// The minimum acceptable remaining lifetime for a reusable relational
    /// match: `now + token_lifetime/2`, clamped to `parent_expires` when the
    /// parent expires sooner. Symmetric with the cache's half-life check.
    #[must_use]
    pub fn min_expires(&self, now: DateTime<Utc>, parent_expires: DateTime<Utc>) -> DateTime<Utc> {
        let half = chrono::Duration::from_std(self.token_lifetime / 2).unwrap_or(chrono::Duration::zero());
        (now + half).min(parent_expires)
    }

    async fn issue(
        &self,
        parent: &TokenData,
        token_type: TokenType,
        service: Option<&str>,
        scopes: BTreeSet<String>,
    ) -> Result<IssuedToken> {
        let now = self.clock.now();
        let min_expires = self.min_expires(now, parent.expires);

        let lookup = ChildLookup {
            parent_key: &parent.key,
            token_type,
            service,
            scopes: Some(&scopes),
            min_expires,
        };
        if let Some(existing) = self.relational.find_child(&lookup).await? {
            if let Some(bytes) = self.kv.get(&crate::token::storage_key_for(&existing.key)).await? {
                let stored: StoredToken = serde_json::from_slice(&bytes)?;
                let token = Token::from_parts(stored.data.key.clone(), stored.secret);
                return Ok(IssuedToken {
                    token,
                    data: stored.data,
                    reused: true,
                });
            }
            // Relational row exists but the K/V entry is gone (evicted or
            // never written due to a crash between writes): fall through and
            // mint a fresh token rather than returning an unusable reference.
        }

        let token = Token::generate();
        let mut expires = now + chrono::Duration::from_std(self.token_lifetime).unwrap_or(chrono::Duration::zero());
        if expires > parent.expires {
            expires = parent.expires;
        }

        let data = TokenData {
            key: token.key().to_string(),
            username: parent.username.clone(),
            token_type,
            scopes: scopes.clone(),
            created: now,
            expires,
            parent_key: Some(parent.key.clone()),
            service: service.map(str::to_string),
            attrs: parent.attrs.clone(),
        };

        let stored = StoredToken {
            secret: token.secret().to_string(),
            data: data.clone(),
        };
        let bytes = serde_json::to_vec(&stored).map_err(Error::from)?;
        self.kv.set(&data.storage_key(), bytes, data.expires).await?;

        self.relational
            .insert_token(TokenRecord {
                key: data.key.clone(),
                username: data.username.clone(),
                token_type: data.token_type,
                parent_key: data.parent_key.clone(),
                service: data.service.clone(),
                scopes: data.scopes.clone(),
                expires: data.expires,
                created: data.created,
            })
            .await?;

        self.relational
            .insert_history(TokenChangeHistoryEntry {
                token_key: data.key.clone(),
                username: data.username.clone(),
                token_type: data.token_type,
                parent_key: data.parent_key.clone(),
                scopes: data.scopes.iter().cloned().collect(),
                service: data.service.clone(),
                expires: data.expires,
                actor: "system".to_string(),
                action: Action::Create,
                ip_address: None,
                event_time: now,
            })
            .await?;

        Ok(IssuedToken { token, data, reused: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::memory::{InMemoryKeyValueStore, InMemoryRelationalStore};

    fn parent(expires: DateTime<Utc>) -> TokenData {
        TokenData {
            key: "parent-key".into(),
            username: "alice".into(),
            token_type: TokenType::Session,
            scopes: BTreeSet::from(["read:all".to_string()]),
            created: Utc::now(),
            expires,
            parent_key: None,
            service: None,
            attrs: Default::default(),
        }
    }

    fn issuer(clock: Arc<ManualClock>) -> (ChildTokenIssuer, Arc<InMemoryRelationalStore>) {
        let kv = Arc::new(InMemoryKeyValueStore::new(clock.clone()));
        let rel = Arc::new(InMemoryRelationalStore::new());
        let issuer = ChildTokenIssuer::new(kv, rel.clone(), clock, StdDuration::from_secs(3600));
        (issuer, rel)
    }

    #[tokio::test]
    async fn mints_fresh_internal_token_on_miss() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, rel) = issuer(clock.clone());
        let parent = parent(clock.now() + chrono::Duration::hours(4));
        let scopes = BTreeSet::from(["read:all".to_string()]);

        let issued = issuer.issue_internal(&parent, "svc-a", &scopes).await.unwrap();
        assert_eq!(issued.data.service.as_deref(), Some("svc-a"));
        assert_eq!(issued.data.scopes, scopes);
        assert_eq!(rel.token_count(), 1);
        assert_eq!(rel.history_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn child_expiry_is_capped_at_parent_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, _rel) = issuer(clock.clone());
        let parent = parent(clock.now() + chrono::Duration::minutes(10));
        let scopes = BTreeSet::from(["read:all".to_string()]);

        let issued = issuer.issue_internal(&parent, "svc-a", &scopes).await.unwrap();
        assert_eq!(issued.data.expires, parent.expires);
    }

    #[tokio::test]
    async fn reuses_existing_child_found_in_relational_and_kv() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, _rel) = issuer(clock.clone());
        let parent = parent(clock.now() + chrono::Duration::hours(4));
        let scopes = BTreeSet::from(["read:all".to_string()]);

        let first = issuer.issue_internal(&parent, "svc-a", &scopes).await.unwrap();
        let second = issuer.issue_internal(&parent, "svc-a", &scopes).await.unwrap();
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.token, second.token);
        assert_eq!(second.data.key, first.data.key);
    }

    #[tokio::test]
    async fn notebook_token_carries_parent_scopes() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let (issuer, _rel) = issuer(clock.clone());
        let parent = parent(clock.now() + chrono::Duration::hours(4));

        let issued = issuer.issue_notebook(&parent).await.unwrap();
        assert_eq!(issued.data.scopes, parent.scopes);
        assert_eq!(issued.data.token_type, TokenType::Notebook);
    }
}
