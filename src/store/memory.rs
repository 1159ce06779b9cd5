//! In-memory reference implementations of [`super::KeyValueStore`] and
//! [`super::RelationalStore`].
//!
//! Backed by `DashMap` for contention-free reads, matching the lock-free
//! cache pattern used elsewhere in the ambient stack. Suitable for tests and
//! standalone operation; not a substitute for a real backend across process
//! restarts or replicas.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{ChildLookup, KeyValueStore, RelationalStore, TokenRecord};
use crate::audit::TokenChangeHistoryEntry;
use crate::clock::Clock;
use crate::error::Result;

struct Entry {
    value: Vec<u8>,
    expires: DateTime<Utc>,
}

/// `DashMap`-backed [`KeyValueStore`]. Expired entries are purged lazily on
/// read rather than by a background reaper, since the store has no
/// process-wide eviction loop of its own.
pub struct InMemoryKeyValueStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl InMemoryKeyValueStore {
    /// Create an empty store using `clock` to evaluate TTL expiry on read.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, expires: DateTime<Utc>) -> Result<()> {
        self.entries.insert(key.to_string(), Entry { value, expires });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// `Mutex<Vec<_>>`-backed [`RelationalStore`]. A real backend would index
/// `(parent_key, type, service, expires)`; a linear scan is adequate for the
/// reference implementation's test-sized data volumes.
#[derive(Default)]
pub struct InMemoryRelationalStore {
    tokens: Mutex<Vec<TokenRecord>>,
    history: Mutex<Vec<TokenChangeHistoryEntry>>,
}

impl InMemoryRelationalStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every history entry written so far (test introspection).
    #[must_use]
    pub fn history_snapshot(&self) -> Vec<TokenChangeHistoryEntry> {
        self.history.lock().clone()
    }

    /// Number of token rows written so far (test introspection).
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn find_child(&self, lookup: &ChildLookup<'_>) -> Result<Option<TokenRecord>> {
        let tokens = self.tokens.lock();
        let found = tokens.iter().find(|t| {
            t.parent_key.as_deref() == Some(lookup.parent_key)
                && t.token_type == lookup.token_type
                && t.service.as_deref() == lookup.service
                && lookup.scopes.is_none_or(|s| &t.scopes == s)
                && t.expires >= lookup.min_expires
        });
        Ok(found.cloned())
    }

    async fn insert_token(&self, record: TokenRecord) -> Result<()> {
        self.tokens.lock().push(record);
        Ok(())
    }

    async fn insert_history(&self, entry: TokenChangeHistoryEntry) -> Result<()> {
        entry.emit();
        self.history.lock().push(entry);
        Ok(())
    }
}
