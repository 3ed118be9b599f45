//! Token lifecycle management.
//!
//! Owns the connect / get-valid-token / disconnect use cases and is the only
//! writer of credential records.
//!
//! # States
//!
//! ```text
//!                connect()
//! Disconnected ────────────→ Connected
//!      ↑                         │ expiry - buffer reached
//!      │                         ↓
//!      │                   Expiring-Soon
//!      │                         │ get_valid_token()
//!      │   permanent failure     ↓
//!      └────────────────── Refreshing ──→ Connected (new tokens stored)
//!      ↑
//!      └── disconnect()
//! ```
//!
//! Refresh is demand-driven: only [`TokenLifecycleManager::get_valid_token`]
//! triggers it, exactly once per staleness detection. A per-(identity, connector)
//! mutex serializes the stale-check-and-refresh sequence, so concurrent callers
//! holding the same stale token produce a single provider call.
//!
//! `connect` additionally holds a per-connector mutex across the
//! already-connected check and the write, so at most one identity is ever
//! active for a connector. Lock order is connector, then identity.
//!
//! Read-style operations never surface errors: store, cipher and provider
//! failures are logged and collapse to `None` / `false` / "disconnected".

use crate::config::LifecycleConfig;
use crate::connector::ConnectorKind;
use crate::credentials::{
    CredentialRecord, CredentialStore, CredentialUpdate, StoreError, TokenCipher,
};
use crate::oauth::{ProviderError, ProviderGateway, TokenResult};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;


/// Errors returned by [`TokenLifecycleManager::connect`].
#[derive(Debug, Error)]
pub enum ConnectError {
    /// A different identity already holds the connector
    #[error("connector {connector} is already connected as {identity}")]
    AlreadyConnected {
        connector: ConnectorKind,
        identity: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to store credentials: {0}")]
    Store(#[from] StoreError),
}

/// Result of a successful [`TokenLifecycleManager::connect`].
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectOutcome {
    pub identity: String,
    /// Access token encrypted with the token cipher
    pub access_token: String,
    pub expires_in: i64,
}

/// Connection state of one connector, as reported by
/// [`TokenLifecycleManager::connector_info`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectorStatus {
    pub connected: bool,
    pub identity: Option<String>,
    /// Access token expiry, epoch seconds
    pub expires_at: Option<i64>,
}

/// What a stored access token is good for right now
enum AccessState {
    Fresh(String),
    Stale,
    Unusable,
}

/// Orchestrates credential storage, encryption and provider calls.
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    cipher: TokenCipher,
    gateway: Arc<ProviderGateway>,
    settings: LifecycleConfig,
    /// One async mutex per (identity, connector). Never removed, so waiters and
    /// newcomers always share one mutex; bounded by identities ever seen.
    refresh_locks: DashMap<(String, ConnectorKind), Arc<Mutex<()>>>,
    /// One async mutex per connector, held by `connect`
    connect_locks: DashMap<ConnectorKind, Arc<Mutex<()>>>,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cipher: TokenCipher,
        gateway: Arc<ProviderGateway>,
        settings: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            cipher,
            gateway,
            settings,
            refresh_locks: DashMap::new(),
            connect_locks: DashMap::new(),
        }
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Connect a connector with a browser-supplied authorization code
    ///
    /// # Arguments
    /// * `connector` - Connector to connect
    /// * `auth_code` - Authorization code from the consent popup
    /// * `code_verifier` - PKCE verifier, if the authorization used one
    ///
    /// # Returns
    /// * `Ok(ConnectOutcome)` - Credentials stored, record connected
    /// * `Err(ConnectError::AlreadyConnected)` - Another identity holds the connector;
    ///   its record is left untouched
    /// * `Err(ConnectError::Provider)` - Exchange, identity or capability check failed
    /// * `Err(ConnectError::Store)` - Credentials could not be persisted
    pub async fn connect(
        &self,
        connector: ConnectorKind,
        auth_code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ConnectOutcome, ConnectError> {
        let result = self
            .gateway
            .exchange_authorization_code(connector, auth_code, code_verifier)
            .await?;

        let connector_lock = self.connect_lock(connector);
        let _connector_guard = connector_lock.lock().await;
        let lock = self.refresh_lock(&result.identity, connector);
        let _guard = lock.lock().await;

        let active = self
            .with_store(move |store| store.find_active_by_connector(connector))
            .await?;

        if let Some(existing) = active {
            if existing.identity != result.identity {
                tracing::warn!(
                    connector = %connector,
                    existing = %existing.identity,
                    requested = %result.identity,
                    "Connector already connected to a different identity"
                );
                return Err(ConnectError::AlreadyConnected {
                    connector,
                    identity: existing.identity,
                });
            }
        }

        self.persist(&result.identity, connector, &result).await?;

        let access_token = self.cipher.encrypt(&result.access_token).ok_or_else(|| {
            ProviderError::Exchange("provider returned an empty access token".to_string())
        })?;

        tracing::info!(
            connector = %connector,
            identity = %result.identity,
            expires_in = result.expires_in,
            "Connector connected"
        );

        Ok(ConnectOutcome {
            identity: result.identity,
            access_token,
            expires_in: result.expires_in,
        })
    }

    /// Returns a freshly encrypted, currently valid access token for `connector`.
    ///
    /// Refreshes the token first if it expires within the configured buffer.
    /// `None` means the caller must reconnect (or, after a transient refresh
    /// failure, try again later).
    pub async fn get_valid_token(&self, connector: ConnectorKind) -> Option<String> {
        let record = self.load_active(connector).await?;

        match self.access_state(&record) {
            AccessState::Fresh(token) => return self.cipher.encrypt(&token),
            AccessState::Unusable => return None,
            AccessState::Stale => {}
        }

        let lock = self.refresh_lock(&record.identity, connector);
        let _guard = lock.lock().await;

        // Another caller may have refreshed (or disconnected) while we waited
        let identity = record.identity.clone();
        let record = match self
            .with_store(move |store| store.find_by_identity(&identity, connector))
            .await
        {
            Ok(Some(record)) if record.connected => record,
            Ok(_) => return None,
            Err(e) => {
                tracing::error!(connector = %connector, error = %e, "Failed to reload credentials");
                return None;
            }
        };

        match self.access_state(&record) {
            AccessState::Fresh(token) => self.cipher.encrypt(&token),
            AccessState::Unusable => None,
            AccessState::Stale => self.refresh(&record).await,
        }
    }

    /// Disconnect the active identity of `connector`
    ///
    /// Revokes the access token at the provider (best effort), then clears the
    /// stored credentials.
    ///
    /// # Returns
    /// * `true` - Record soft-disconnected
    /// * `false` - Nothing was connected, or the store write failed
    pub async fn disconnect(&self, connector: ConnectorKind) -> bool {
        let record = match self.load_active(connector).await {
            Some(record) => record,
            None => {
                tracing::debug!(connector = %connector, "Nothing to disconnect");
                return false;
            }
        };

        let lock = self.refresh_lock(&record.identity, connector);
        let _guard = lock.lock().await;

        match record.access_token.as_deref().map(|c| self.cipher.decrypt(c)) {
            Some(Ok(Some(token))) => {
                if !self.gateway.revoke_token(connector, &token).await {
                    tracing::warn!(
                        connector = %connector,
                        identity = %record.identity,
                        "Provider-side revocation failed, disconnecting locally"
                    );
                }
            }
            Some(Err(e)) => {
                tracing::warn!(
                    connector = %connector,
                    error = %e,
                    "Stored access token unreadable, skipping revocation"
                );
            }
            _ => {}
        }

        self.soft_disconnect(&record.identity, connector).await
    }

    /// Reports the connection state of every known connector.
    ///
    /// A lookup failure for one connector reports it as disconnected and does not
    /// affect the others.
    pub async fn connector_info(&self) -> BTreeMap<ConnectorKind, ConnectorStatus> {
        let mut info = BTreeMap::new();

        for &connector in ConnectorKind::ALL {
            let status = match self
                .with_store(move |store| store.find_active_by_connector(connector))
                .await
            {
                Ok(Some(record)) if record.connected => ConnectorStatus {
                    connected: true,
                    identity: Some(record.identity),
                    expires_at: record.access_token_expiry,
                },
                Ok(_) => ConnectorStatus::default(),
                Err(e) => {
                    tracing::warn!(
                        connector = %connector,
                        error = %e,
                        "Connector status lookup failed, reporting disconnected"
                    );
                    ConnectorStatus::default()
                }
            };

            info.insert(connector, status);
        }

        info
    }

    /// Runs one refresh attempt for a stale record. Caller holds the refresh lock.
    async fn refresh(&self, record: &CredentialRecord) -> Option<String> {
        let connector = record.connector;

        let refresh_token = match record.refresh_token.as_deref().map(|c| self.cipher.decrypt(c)) {
            Some(Ok(Some(token))) => token,
            Some(Err(e)) => {
                tracing::warn!(
                    connector = %connector,
                    identity = %record.identity,
                    error = %e,
                    "Stored refresh token unreadable"
                );
                return None;
            }
            _ => {
                tracing::info!(
                    connector = %connector,
                    identity = %record.identity,
                    "Access token expired and no refresh token stored"
                );
                return None;
            }
        };

        tracing::debug!(connector = %connector, identity = %record.identity, "Refreshing access token");

        match self.gateway.refresh_access_token(connector, &refresh_token).await {
            Ok(result) => {
                if result.identity != record.identity {
                    tracing::warn!(
                        connector = %connector,
                        stored = %record.identity,
                        resolved = %result.identity,
                        "Refreshed token resolved to a different identity"
                    );
                }

                if let Err(e) = self.persist(&record.identity, connector, &result).await {
                    tracing::error!(
                        connector = %connector,
                        identity = %record.identity,
                        error = %e,
                        "Failed to store refreshed credentials"
                    );
                    return None;
                }

                tracing::info!(
                    connector = %connector,
                    identity = %record.identity,
                    expires_in = result.expires_in,
                    "Access token refreshed"
                );
                self.cipher.encrypt(&result.access_token)
            }
            Err(e) => {
                if self.disconnects_on(&e) {
                    tracing::warn!(
                        connector = %connector,
                        identity = %record.identity,
                        invalid_grant = e.is_invalid_grant(),
                        error = %e,
                        "Token refresh failed, disconnecting"
                    );
                    self.soft_disconnect(&record.identity, connector).await;
                } else {
                    tracing::warn!(
                        connector = %connector,
                        identity = %record.identity,
                        error = %e,
                        "Token refresh failed, keeping connection for retry"
                    );
                }
                None
            }
        }
    }

    fn disconnects_on(&self, error: &ProviderError) -> bool {
        match error {
            // Local misconfiguration says nothing about the stored grant
            ProviderError::NotConfigured(_) => false,
            e if e.is_transient() => self.settings.disconnect_on_transient_refresh_failure,
            _ => true,
        }
    }

    fn access_state(&self, record: &CredentialRecord) -> AccessState {
        // No access token means the record never held a usable grant
        let ciphertext = match record.access_token.as_deref() {
            Some(c) => c,
            None => return AccessState::Unusable,
        };

        let token = match self.cipher.decrypt(ciphertext) {
            Ok(Some(token)) => token,
            Ok(None) => return AccessState::Unusable,
            Err(e) => {
                tracing::warn!(
                    connector = %record.connector,
                    identity = %record.identity,
                    error = %e,
                    "Stored access token unreadable"
                );
                return AccessState::Unusable;
            }
        };

        // A missing expiry is treated as already expired
        let now = Utc::now().timestamp();
        match record.access_token_expiry {
            Some(expiry) if now < expiry - self.settings.expiry_buffer_secs => {
                AccessState::Fresh(token)
            }
            _ => AccessState::Stale,
        }
    }

    async fn load_active(&self, connector: ConnectorKind) -> Option<CredentialRecord> {
        match self
            .with_store(move |store| store.find_active_by_connector(connector))
            .await
        {
            Ok(Some(record)) if record.connected => Some(record),
            Ok(_) => None,
            Err(e) => {
                tracing::error!(connector = %connector, error = %e, "Failed to load credentials");
                None
            }
        }
    }

    async fn persist(
        &self,
        identity: &str,
        connector: ConnectorKind,
        result: &TokenResult,
    ) -> Result<CredentialRecord, StoreError> {
        let update = CredentialUpdate {
            access_token: self.cipher.encrypt(&result.access_token),
            access_token_expiry: Some(result.access_token_expiry),
            refresh_token: result
                .refresh_token
                .as_deref()
                .and_then(|t| self.cipher.encrypt(t)),
            refresh_token_expiry: result.refresh_token_expiry,
        };

        let identity = identity.to_string();
        self.with_store(move |store| store.upsert(&identity, connector, &update))
            .await
    }

    async fn soft_disconnect(&self, identity: &str, connector: ConnectorKind) -> bool {
        let owned = identity.to_string();
        match self
            .with_store(move |store| store.soft_disconnect(&owned, connector))
            .await
        {
            Ok(true) => {
                tracing::info!(connector = %connector, identity = %identity, "Connector disconnected");
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!(
                    connector = %connector,
                    identity = %identity,
                    error = %e,
                    "Failed to disconnect credentials"
                );
                false
            }
        }
    }

    /// Runs a blocking store call off the async executor
    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&dyn CredentialStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    fn refresh_lock(&self, identity: &str, connector: ConnectorKind) -> Arc<Mutex<()>> {
        self.refresh_locks
            .entry((identity.to_string(), connector))
            .or_default()
            .clone()
    }

    fn connect_lock(&self, connector: ConnectorKind) -> Arc<Mutex<()>> {
        self.connect_locks.entry(connector).or_default().clone()
    }
}
