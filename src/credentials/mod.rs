//! Encrypted credential storage for connector OAuth tokens.
//!
//! One [`CredentialRecord`] exists per (identity, connector) pair. Tokens are
//! stored as ciphertext produced by [`TokenCipher`]; the store itself never sees
//! plaintext.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       TokenLifecycleManager              │
//! │  - sole writer of credential records     │
//! └─────────────────────────────────────────┘
//!          ↓ (encrypt)          ↑ (decrypt)
//! ┌─────────────────────────────────────────┐
//! │       TokenCipher                        │
//! │  - AES-256-CBC, random IV per call       │
//! └─────────────────────────────────────────┘
//!          ↓                    ↑
//! ┌─────────────────────────────────────────┐
//! │       CredentialStore (SQLite)           │
//! │  - find / upsert / soft-disconnect       │
//! │  - one transaction per write             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Single active identity
//!
//! At most one record per connector has `connected = true`. The store does not
//! enforce this; the lifecycle manager rejects a second identity at connect time.
//! [`CredentialStore::find_active_by_connector`] fails with
//! [`StoreError::MultipleActive`] if the invariant has been broken.

use crate::connector::ConnectorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

mod encryption;
mod storage;

pub use encryption::{CipherError, TokenCipher};
pub use storage::SqliteCredentialStore;

/// Stored credentials for one identity on one connector.
///
/// Token fields hold ciphertext, never plaintext.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CredentialRecord {
    pub id: Uuid,

    /// Provider-resolved account identifier (email)
    pub identity: String,

    pub connector: ConnectorKind,

    /// Encrypted access token (cleared on disconnect)
    #[serde(skip_serializing)]
    pub access_token: Option<String>,

    /// Encrypted refresh token (cleared on disconnect)
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,

    /// Access token expiry, epoch seconds
    pub access_token_expiry: Option<i64>,

    /// Refresh token expiry, epoch seconds (most providers never send one)
    pub refresh_token_expiry: Option<i64>,

    pub connected: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by [`CredentialStore::upsert`].
///
/// `None` leaves the stored value untouched on update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CredentialUpdate {
    pub access_token: Option<String>,
    pub access_token_expiry: Option<i64>,
    pub refresh_token: Option<String>,
    pub refresh_token_expiry: Option<i64>,
}

/// Errors raised by a [`CredentialStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("more than one connected record for connector {0}")]
    MultipleActive(ConnectorKind),

    #[error("credential store lock poisoned")]
    Lock,

    #[error("credential store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable keyed storage of credential records.
///
/// Every write is all-or-nothing: a failed call leaves the previous record intact.
/// "Not found" is `Ok(None)` / `Ok(false)`, never an error.
pub trait CredentialStore: Send + Sync {
    /// Looks up the record for an exact (identity, connector) pair.
    fn find_by_identity(
        &self,
        identity: &str,
        connector: ConnectorKind,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Returns the connected record for `connector`, if any.
    fn find_active_by_connector(
        &self,
        connector: ConnectorKind,
    ) -> Result<Option<CredentialRecord>, StoreError>;

    /// Creates the record if absent, otherwise merges the non-`None` fields of
    /// `update` into it. Always marks the record connected.
    fn upsert(
        &self,
        identity: &str,
        connector: ConnectorKind,
        update: &CredentialUpdate,
    ) -> Result<CredentialRecord, StoreError>;

    /// Clears both tokens and both expiries and marks the record disconnected.
    ///
    /// Returns `false` if no record matches.
    fn soft_disconnect(&self, identity: &str, connector: ConnectorKind) -> Result<bool, StoreError>;
}
