//! Tamper-evident audit trail for token lifecycle events.
//!
//! Every history entry is both persisted to the relational store (the
//! durable record) and emitted as a structured `tracing` event (the
//! operationally-visible trail), mirroring how the rest of the ambient
//! stack surfaces state changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::token::TokenType;

/// The lifecycle action a [`TokenChangeHistoryEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// A new token was issued.
    Create,
    /// An existing token's metadata was edited.
    Edit,
    /// A token was explicitly revoked.
    Revoke,
    /// A token expired.
    Expire,
}

/// Append-only audit record written in the same logical transaction as the
/// token-store insert (see `issuer::ChildTokenIssuer::issue`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenChangeHistoryEntry {
    /// The affected token's key.
    pub token_key: String,
    /// Owning username.
    pub username: String,
    /// Kind of credential.
    pub token_type: TokenType,
    /// Parent token key, if any.
    pub parent_key: Option<String>,
    /// Granted scopes at the time of the action.
    pub scopes: Vec<String>,
    /// Downstream service, for internal tokens.
    pub service: Option<String>,
    /// Expiry timestamp recorded at the time of the action.
    pub expires: DateTime<Utc>,
    /// Who performed the action (username, `"system"`, or a client id).
    pub actor: String,
    /// What happened.
    pub action: Action,
    /// Caller IP address, when known.
    pub ip_address: Option<String>,
    /// When the action occurred.
    pub event_time: DateTime<Utc>,
}

impl TokenChangeHistoryEntry {
    /// Emit this entry as a structured `tracing` audit event.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "<unserializable>".to_string());
        tracing::info!(audit = %json, token_key = %self.token_key, action = ?self.action, "token change");
    }
}
