//! Standard OAuth 2.0 token endpoint calls.
//!
//! Form-encoded POSTs for the `authorization_code` and `refresh_token` grants,
//! plus classification of token endpoint failures. Provider adapters decide what
//! to do with the classified error.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// OAuth token response (standard OAuth 2.0)
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token_expires_in: Option<i64>,
}

/// OAuth error body (RFC 6749 section 5.2)
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Failure talking to a token endpoint.
#[derive(Debug, Error)]
pub(crate) enum TokenEndpointError {
    /// Request never produced a response (DNS, connect, timeout)
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("status {status} ({}): {description}", .error.as_deref().unwrap_or("no error code"))]
    Rejected {
        status: StatusCode,
        /// OAuth `error` code, when the body carried one
        error: Option<String>,
        description: String,
    },

    /// Success status but the body was unusable
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TokenEndpointError {
    /// True when the provider says the grant itself is no longer valid.
    ///
    /// A refresh failing this way will keep failing; the connection is dead.
    pub fn is_invalid_grant(&self) -> bool {
        match self {
            TokenEndpointError::Rejected { error, description, .. } => {
                error.as_deref() == Some("invalid_grant") || description.contains("invalid_grant")
            }
            _ => false,
        }
    }

    /// True when retrying later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TokenEndpointError::Transport(_) => true,
            TokenEndpointError::Rejected { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            TokenEndpointError::Malformed(_) => false,
        }
    }
}

/// Exchange an authorization code for tokens
///
/// # Arguments
/// * `client` - Shared HTTP client
/// * `token_url` - OAuth token endpoint URL
/// * `code` - Authorization code from the browser
/// * `redirect_uri` - Redirect URI used in the authorization request
/// * `client_id` / `client_secret` - OAuth client credentials
/// * `code_verifier` - PKCE verifier, if the authorization request used one
pub(crate) async fn exchange_code(
    client: &reqwest::Client,
    token_url: &str,
    code: &str,
    redirect_uri: &str,
    client_id: &str,
    client_secret: &str,
    code_verifier: Option<&str>,
) -> Result<TokenResponse, TokenEndpointError> {
    let mut form = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier", verifier));
    }

    tracing::debug!(token_url = %token_url, "Exchanging authorization code");
    post_token_form(client, token_url, &form).await
}

/// Redeem a refresh token for a new access token
pub(crate) async fn refresh_token(
    client: &reqwest::Client,
    token_url: &str,
    refresh_token: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<TokenResponse, TokenEndpointError> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", client_id),
        ("client_secret", client_secret),
    ];

    tracing::debug!(token_url = %token_url, "Refreshing access token");
    post_token_form(client, token_url, &form).await
}

async fn post_token_form(
    client: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, TokenEndpointError> {
    let response = client
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await
        .map_err(TokenEndpointError::Transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(rejected(status, &body));
    }

    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| TokenEndpointError::Malformed(e.to_string()))?;

    if token_response.access_token.as_deref().map_or(true, str::is_empty) {
        return Err(TokenEndpointError::Malformed(
            "response has no access_token".to_string(),
        ));
    }

    tracing::debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token endpoint call successful"
    );

    Ok(token_response)
}

fn rejected(status: StatusCode, body: &str) -> TokenEndpointError {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(parsed) => TokenEndpointError::Rejected {
            status,
            error: Some(parsed.error),
            description: parsed.error_description.unwrap_or_default(),
        },
        Err(_) => TokenEndpointError::Rejected {
            status,
            error: None,
            description: body.chars().take(200).collect(),
        },
    }
}
