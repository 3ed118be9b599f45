//! Provider gateway for OAuth connectors.
//!
//! Routes each operation to the adapter for the requested connector. The set of
//! adapters is a closed enum, one variant per [`ConnectorKind`].
//!
//! # Flow
//!
//! ```text
//! Browser (popup consent) → authorization code
//!        ↓
//! POST /auth/connect → TokenLifecycleManager::connect
//!        ↓
//! ProviderGateway::exchange_authorization_code
//!        ↓
//! ProviderAdapter::GoogleDrive
//!   - token endpoint (authorization_code grant)
//!   - userinfo (identity)
//!   - Drive probe (capability)
//!        ↓
//! TokenResult (plaintext tokens, never stored as-is)
//! ```
//!
//! Every call shares one [`reqwest::Client`] with bounded connect and request
//! timeouts. A connector without client credentials fails with
//! [`ProviderError::NotConfigured`] before any network I/O.

mod exchange;
mod provider;

use crate::config::{ConnectorsConfig, HttpConfig};
use crate::connector::ConnectorKind;
use thiserror::Error;

pub use provider::GoogleDriveProvider;

/// Tokens issued by a provider, with the account they belong to.
///
/// Tokens are plaintext here; the lifecycle manager encrypts them before they
/// reach the store.
#[derive(Clone, PartialEq)]
pub struct TokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Epoch seconds
    pub access_token_expiry: i64,
    /// Epoch seconds, when the provider sends one
    pub refresh_token_expiry: Option<i64>,
    pub identity: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

impl std::fmt::Debug for TokenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResult")
            .field("identity", &self.identity)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("access_token_expiry", &self.access_token_expiry)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Errors raised by the provider gateway.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connector {0} is not configured")]
    NotConfigured(ConnectorKind),

    #[error("authorization code exchange failed: {0}")]
    Exchange(String),

    #[error("token refresh failed: {message}")]
    Refresh {
        /// Provider rejected the refresh token itself
        invalid_grant: bool,
        /// Timeout, 5xx or rate limit
        transient: bool,
        message: String,
    },

    #[error("failed to resolve account identity: {0}")]
    Identity(String),

    #[error("connector capability check failed: {0}")]
    Capability(String),

    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProviderError {
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, ProviderError::Refresh { invalid_grant: true, .. })
    }

    /// True when the same call could succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Refresh { transient, .. } => *transient,
            ProviderError::Transport(_) => true,
            _ => false,
        }
    }
}

/// Adapter for one connector, borrowed from the gateway.
#[derive(Clone, Copy, Debug)]
pub enum ProviderAdapter<'a> {
    GoogleDrive(&'a GoogleDriveProvider),
}

impl ProviderAdapter<'_> {
    async fn exchange_code(
        &self,
        client: &reqwest::Client,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResult, ProviderError> {
        match self {
            ProviderAdapter::GoogleDrive(p) => p.exchange_code(client, code, code_verifier).await,
        }
    }

    async fn refresh(
        &self,
        client: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<TokenResult, ProviderError> {
        match self {
            ProviderAdapter::GoogleDrive(p) => p.refresh(client, refresh_token).await,
        }
    }

    async fn revoke(&self, client: &reqwest::Client, token: &str) -> bool {
        match self {
            ProviderAdapter::GoogleDrive(p) => p.revoke(client, token).await,
        }
    }

    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> String {
        match self {
            ProviderAdapter::GoogleDrive(p) => p.authorization_url(state, code_challenge),
        }
    }
}

/// Build the shared HTTP client for provider calls
pub fn build_http_client(config: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .pool_idle_timeout(config.pool_idle_timeout())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .build()
}

/// Dispatches provider operations by connector.
#[derive(Debug)]
pub struct ProviderGateway {
    client: reqwest::Client,
    google_drive: Option<GoogleDriveProvider>,
}

impl ProviderGateway {
    /// Creates a gateway over `client` for every configured connector.
    ///
    /// Connectors without client credentials are logged and left unconfigured.
    pub fn new(client: reqwest::Client, connectors: &ConnectorsConfig) -> Self {
        let google_drive = GoogleDriveProvider::from_config(&connectors.google_drive);
        if google_drive.is_none() {
            tracing::warn!(
                connector = %ConnectorKind::GoogleDrive,
                "OAuth client credentials missing, connector disabled"
            );
        }

        Self {
            client,
            google_drive,
        }
    }

    pub fn is_configured(&self, connector: ConnectorKind) -> bool {
        self.adapter(connector).is_ok()
    }

    /// Returns the adapter for `connector`
    ///
    /// # Returns
    /// * `Ok(ProviderAdapter)` - Connector has client credentials
    /// * `Err(ProviderError::NotConfigured)` - Otherwise
    pub fn adapter(&self, connector: ConnectorKind) -> Result<ProviderAdapter<'_>, ProviderError> {
        match connector {
            ConnectorKind::GoogleDrive => self
                .google_drive
                .as_ref()
                .map(ProviderAdapter::GoogleDrive)
                .ok_or(ProviderError::NotConfigured(connector)),
        }
    }

    /// Exchange a browser-supplied authorization code for tokens and identity.
    pub async fn exchange_authorization_code(
        &self,
        connector: ConnectorKind,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResult, ProviderError> {
        self.adapter(connector)?
            .exchange_code(&self.client, code, code_verifier)
            .await
    }

    /// Redeem a refresh token. Classify failures with
    /// [`ProviderError::is_invalid_grant`] and [`ProviderError::is_transient`].
    pub async fn refresh_access_token(
        &self,
        connector: ConnectorKind,
        refresh_token: &str,
    ) -> Result<TokenResult, ProviderError> {
        self.adapter(connector)?
            .refresh(&self.client, refresh_token)
            .await
    }

    /// Best-effort revocation. `false` covers rejection, transport failure and
    /// unconfigured connectors alike.
    pub async fn revoke_token(&self, connector: ConnectorKind, token: &str) -> bool {
        match self.adapter(connector) {
            Ok(adapter) => adapter.revoke(&self.client, token).await,
            Err(_) => false,
        }
    }

    /// URL of the provider consent screen for the popup code flow.
    pub fn authorization_url(
        &self,
        connector: ConnectorKind,
        state: &str,
        code_challenge: Option<&str>,
    ) -> Result<String, ProviderError> {
        Ok(self.adapter(connector)?.authorization_url(state, code_challenge))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GoogleDriveConfig;
    use mockito::Server;

    fn unconfigured() -> ProviderGateway {
        ProviderGateway::new(reqwest::Client::new(), &ConnectorsConfig::default())
    }

    #[tokio::test]
    async fn test_unconfigured_connector_fails_fast() {
        let gateway = unconfigured();
        assert!(!gateway.is_configured(ConnectorKind::GoogleDrive));

        let err = gateway
            .exchange_authorization_code(ConnectorKind::GoogleDrive, "code", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(ConnectorKind::GoogleDrive)));

        let err = gateway
            .refresh_access_token(ConnectorKind::GoogleDrive, "refresh")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_transient());

        assert!(!gateway.revoke_token(ConnectorKind::GoogleDrive, "token").await);
        assert!(gateway
            .authorization_url(ConnectorKind::GoogleDrive, "state", None)
            .is_err());
    }

    #[tokio::test]
    async fn test_gateway_routes_to_google_drive() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/revoke")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .create_async()
            .await;

        let connectors = ConnectorsConfig {
            google_drive: GoogleDriveConfig::with_base_url(&server.url(), "id", "secret"),
        };
        let gateway = ProviderGateway::new(reqwest::Client::new(), &connectors);

        assert!(gateway.is_configured(ConnectorKind::GoogleDrive));
        assert!(gateway.revoke_token(ConnectorKind::GoogleDrive, "token").await);
        mock.assert_async().await;

        let url = gateway
            .authorization_url(ConnectorKind::GoogleDrive, "state", None)
            .unwrap();
        assert!(url.starts_with(&format!("{}/auth?", server.url())));
    }

    #[test]
    fn test_error_classification() {
        let revoked = ProviderError::Refresh {
            invalid_grant: true,
            transient: false,
            message: "invalid_grant".to_string(),
        };
        assert!(revoked.is_invalid_grant());
        assert!(!revoked.is_transient());

        assert!(!ProviderError::Identity("no email".to_string()).is_transient());
        assert!(!ProviderError::Exchange("bad code".to_string()).is_invalid_grant());
    }

    #[test]
    fn test_token_result_debug_hides_tokens() {
        let result = TokenResult {
            access_token: "plaintext-access".to_string(),
            refresh_token: Some("plaintext-refresh".to_string()),
            access_token_expiry: 0,
            refresh_token_expiry: None,
            identity: "user@example.com".to_string(),
            expires_in: 3600,
        };

        let debug = format!("{:?}", result);
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("plaintext-access"));
        assert!(!debug.contains("plaintext-refresh"));
    }

    #[test]
    fn test_build_http_client() {
        assert!(build_http_client(&HttpConfig::default()).is_ok());
    }
}
