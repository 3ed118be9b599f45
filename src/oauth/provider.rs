//! Google Drive provider adapter.
//!
//! Implements the Google side of the connector protocol:
//! - code exchange against the token endpoint (`redirect_uri=postmessage`)
//! - account identity from the userinfo endpoint (email)
//! - a Drive capability probe so a connection is only stored if Drive is usable
//! - token revocation

use super::exchange::{self, TokenEndpointError, TokenResponse, DEFAULT_EXPIRES_IN};
use super::{ProviderError, TokenResult};
use crate::config::GoogleDriveConfig;
use crate::connector::ConnectorKind;
use chrono::Utc;
use serde::Deserialize;

/// Google userinfo response (only the fields we use)
#[derive(Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

/// Configured Google Drive OAuth client.
#[derive(Clone)]
pub struct GoogleDriveProvider {
    client_id: String,
    client_secret: String,
    config: GoogleDriveConfig,
}

impl std::fmt::Debug for GoogleDriveProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveProvider")
            .field("client_id", &self.client_id)
            .field("token_url", &self.config.token_url)
            .finish_non_exhaustive()
    }
}

impl GoogleDriveProvider {
    /// Builds the adapter, or `None` if client credentials are missing.
    pub fn from_config(config: &GoogleDriveConfig) -> Option<Self> {
        if !config.has_client_credentials() {
            return None;
        }

        Some(Self {
            client_id: config.client_id.clone()?,
            client_secret: config.client_secret.clone()?,
            config: config.clone(),
        })
    }

    /// Build authorization URL for the offline-access consent screen
    pub fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> String {
        let scopes = self.config.scopes.join(" ");
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent&include_granted_scopes=true",
            self.config.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        );

        if let Some(challenge) = code_challenge {
            url.push_str("&code_challenge=");
            url.push_str(&urlencoding::encode(challenge));
            url.push_str("&code_challenge_method=S256");
        }

        url
    }

    /// Exchange an authorization code and resolve the account behind it.
    ///
    /// Fails unless the resulting token can read Drive.
    pub async fn exchange_code(
        &self,
        client: &reqwest::Client,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResult, ProviderError> {
        let response = exchange::exchange_code(
            client,
            &self.config.token_url,
            code,
            &self.config.redirect_uri,
            &self.client_id,
            &self.client_secret,
            code_verifier,
        )
        .await
        .map_err(|e| ProviderError::Exchange(e.to_string()))?;

        let tokens = IssuedTokens::from_response(response, None)
            .ok_or_else(|| ProviderError::Exchange("response has no access_token".to_string()))?;

        let identity = self.fetch_identity(client, &tokens.access_token).await?;
        self.probe_drive_access(client, &tokens.access_token).await?;

        tracing::info!(
            connector = %ConnectorKind::GoogleDrive,
            identity = %identity,
            has_refresh_token = tokens.refresh_token.is_some(),
            "Authorization code exchanged"
        );

        Ok(tokens.into_result(identity))
    }

    /// Redeem a refresh token.
    ///
    /// Google normally does not rotate refresh tokens; when the response omits
    /// one the old token is carried over.
    pub async fn refresh(
        &self,
        client: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<TokenResult, ProviderError> {
        let response = exchange::refresh_token(
            client,
            &self.config.token_url,
            refresh_token,
            &self.client_id,
            &self.client_secret,
        )
        .await
        .map_err(refresh_error)?;

        let tokens = IssuedTokens::from_response(response, Some(refresh_token)).ok_or_else(|| {
            ProviderError::Refresh {
                invalid_grant: false,
                transient: false,
                message: "response has no access_token".to_string(),
            }
        })?;

        let identity = self
            .fetch_identity(client, &tokens.access_token)
            .await
            .map_err(|e| ProviderError::Refresh {
                invalid_grant: false,
                transient: e.is_transient(),
                message: e.to_string(),
            })?;

        Ok(tokens.into_result(identity))
    }

    /// Revoke a token at Google. Returns `true` only on a 200.
    pub async fn revoke(&self, client: &reqwest::Client, token: &str) -> bool {
        let result = client
            .post(&self.config.revoke_url)
            .query(&[("token", token)])
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!(
                    connector = %ConnectorKind::GoogleDrive,
                    status = %response.status(),
                    "Token revocation rejected"
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    connector = %ConnectorKind::GoogleDrive,
                    error = %e,
                    "Token revocation request failed"
                );
                false
            }
        }
    }

    async fn fetch_identity(
        &self,
        client: &reqwest::Client,
        access_token: &str,
    ) -> Result<String, ProviderError> {
        let response = client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Identity(format!(
                "userinfo returned status {}",
                status
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| ProviderError::Identity(format!("invalid userinfo response: {}", e)))?;

        info.email
            .filter(|email| !email.is_empty())
            .ok_or_else(|| ProviderError::Identity("userinfo response has no email".to_string()))
    }

    async fn probe_drive_access(
        &self,
        client: &reqwest::Client,
        access_token: &str,
    ) -> Result<(), ProviderError> {
        let response = client
            .get(&self.config.drive_probe_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Capability(format!(
                "Drive API returned status {}",
                status
            )));
        }

        Ok(())
    }
}

/// Tokens from a successful token endpoint call, before identity resolution
struct IssuedTokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
    refresh_token_expires_in: Option<i64>,
}

impl IssuedTokens {
    fn from_response(response: TokenResponse, previous_refresh: Option<&str>) -> Option<Self> {
        let access_token = response.access_token.filter(|t| !t.is_empty())?;
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string));

        Some(Self {
            access_token,
            refresh_token,
            expires_in: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            refresh_token_expires_in: response.refresh_token_expires_in,
        })
    }

    fn into_result(self, identity: String) -> TokenResult {
        let now = Utc::now().timestamp();
        TokenResult {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            access_token_expiry: now + self.expires_in,
            refresh_token_expiry: self.refresh_token_expires_in.map(|secs| now + secs),
            identity,
            expires_in: self.expires_in,
        }
    }
}

fn refresh_error(e: TokenEndpointError) -> ProviderError {
    ProviderError::Refresh {
        invalid_grant: e.is_invalid_grant(),
        transient: e.is_transient(),
        message: e.to_string(),
    }
}
