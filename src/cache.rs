//! Child-token cache (C5): a per-username serialized cache in front of
//! [`crate::issuer::ChildTokenIssuer`], applying the half-life and
//! scope-subset validity policy before returning a cached hit.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::Clock;
use crate::error::Result;
use crate::issuer::{ChildTokenIssuer, IssuedToken};
use crate::token::TokenData;

#[derive(Clone, Eq, PartialEq, Hash)]
struct NotebookKey {
    parent_key: String,
    parent_expires: DateTime<Utc>,
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct InternalKey {
    parent_key: String,
    parent_expires: DateTime<Utc>,
    service: String,
    scopes: BTreeSet<String>,
}

/// Per-user serialized cache for internal and notebook child tokens.
///
/// Keyed lazily per username: the lock map itself is a `DashMap`, so
/// acquiring a user's lock never blocks on another user's in-flight
/// issuance. Holding the per-user lock across the issuer's store calls is
/// deliberate — it is what prevents a thundering herd of concurrent misses
/// for the same user from each minting their own child token.
pub struct ChildTokenCache {
    issuer: Arc<ChildTokenIssuer>,
    clock: Arc<dyn Clock>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    notebook: DashMap<NotebookKey, IssuedToken>,
    internal: DashMap<InternalKey, IssuedToken>,
}

impl ChildTokenCache {
    /// Build a cache fronting `issuer`, using `clock` to evaluate the
    /// half-life validity rule.
    #[must_use]
    pub fn new(issuer: Arc<ChildTokenIssuer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            issuer,
            clock,
            locks: DashMap::new(),
            notebook: DashMap::new(),
            internal: DashMap::new(),
        }
    }

    /// Return a valid internal token scoped to `service`/`scopes`, reusing a
    /// cached entry when the half-life and scope-subset policy allows it,
    /// otherwise issuing (or reusing from the store) a fresh one.
    pub async fn get_internal_token(&self, parent: &TokenData, service: &str, scopes: &BTreeSet<String>) -> Result<IssuedToken> {
        let _guard = self.lock_for(&parent.username).await;

        let key = InternalKey {
            parent_key: parent.key.clone(),
            parent_expires: parent.expires,
            service: service.to_string(),
            scopes: scopes.clone(),
        };
        if let Some(cached) = self.internal.get(&key) {
            if self.is_valid(&cached.data, Some(scopes)) {
                return Ok(cached.clone());
            }
        }

        let issued = self.issuer.issue_internal(parent, service, scopes).await?;
        // Do not cache a reused hit here; the next get will cache it once it
        // has actually been validated against this process's half-life rule.
        if !issued.reused {
            self.internal.insert(key, issued.clone());
        }
        Ok(issued)
    }

    /// Return a valid notebook token for `parent`, reusing a cached entry
    /// when the half-life policy allows it, otherwise issuing a fresh one.
    pub async fn get_notebook_token(&self, parent: &TokenData) -> Result<IssuedToken> {
        let _guard = self.lock_for(&parent.username).await;

        let key = NotebookKey {
            parent_key: parent.key.clone(),
            parent_expires: parent.expires,
        };
        if let Some(cached) = self.notebook.get(&key) {
            if self.is_valid(&cached.data, None) {
                return Ok(cached.clone());
            }
        }

        let issued = self.issuer.issue_notebook(parent).await?;
        if !issued.reused {
            self.notebook.insert(key, issued.clone());
        }
        Ok(issued)
    }

    /// Whether `data` is still usable as a cache hit: it satisfies the
    /// scope-subset rule against `requested_scopes` (when supplied) and has
    /// more than half of its nominal lifetime remaining. K/V retrievability
    /// is checked by the issuer on a cache miss, not re-checked here, since a
    /// cache entry already reflects a K/V write that just succeeded.
    fn is_valid(&self, data: &TokenData, requested_scopes: Option<&BTreeSet<String>>) -> bool {
        if let Some(requested) = requested_scopes {
            if !data.scopes.is_subset(requested) {
                return false;
            }
        }
        let now = self.clock.now();
        if now >= data.expires {
            return false;
        }
        let lifetime = data.expires - data.created;
        let remaining = data.expires - now;
        remaining * 2 > lifetime
    }

    async fn lock_for(&self, username: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(username.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
