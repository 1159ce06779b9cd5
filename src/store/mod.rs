//! External persistence collaborators.
//!
//! The component design treats the key-value store and the relational store
//! as interfaces only (§1/§6): "a key-value store with atomic get/set/delete,
//! a relational store with transactional reads and inserts". Production
//! backends (Redis, Postgres, ...) are out of scope; [`memory`] ships an
//! in-memory reference implementation of both traits for tests and
//! standalone operation.

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::audit::TokenChangeHistoryEntry;
use crate::error::Result;
use crate::token::TokenType;

/// Atomic get/set/delete key-value store, keyed by opaque string keys
/// (`token:<key>`, `oidc:<key>`). Values are opaque byte blobs; callers
/// (de)serialize their own envelope.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Fetch the raw value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key` with a TTL matching the record's `expires`.
    async fn set(&self, key: &str, value: Vec<u8>, expires: DateTime<Utc>) -> Result<()>;

    /// Remove `key` unconditionally. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// A row in the conceptual `token` table: enough to answer "does a reusable
/// child already exist" without touching the key-value store.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    /// The token's key (primary key).
    pub key: String,
    /// Owning username.
    pub username: String,
    /// Kind of credential.
    pub token_type: TokenType,
    /// Parent token key, for child credentials.
    pub parent_key: Option<String>,
    /// Downstream service, for internal tokens.
    pub service: Option<String>,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// Expiry timestamp.
    pub expires: DateTime<Utc>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
}

/// Criteria for locating a reusable child token in the relational store.
#[derive(Debug, Clone)]
pub struct ChildLookup<'a> {
    /// The parent token's key.
    pub parent_key: &'a str,
    /// The child type being requested (`Internal` or `Notebook`).
    pub token_type: TokenType,
    /// For internal tokens, the downstream service name.
    pub service: Option<&'a str>,
    /// For internal tokens, the exact requested scope set.
    pub scopes: Option<&'a BTreeSet<String>>,
    /// The minimum acceptable `expires` for a reusable match.
    pub min_expires: DateTime<Utc>,
}

/// Transactional reads and inserts over the `token` and
/// `token_change_history` tables.
#[async_trait]
pub trait RelationalStore: Send + Sync + 'static {
    /// Find an existing child token matching `lookup`, if any.
    async fn find_child(&self, lookup: &ChildLookup<'_>) -> Result<Option<TokenRecord>>;

    /// Insert a new row into the `token` table.
    async fn insert_token(&self, record: TokenRecord) -> Result<()>;

    /// Append a row to `token_change_history`.
    async fn insert_history(&self, entry: TokenChangeHistoryEntry) -> Result<()>;
}
