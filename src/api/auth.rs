//! Connector authentication endpoints.
//!
//! - `POST /auth/connect` - exchange a popup authorization code, store credentials
//! - `POST /auth/token-refresh` - get a valid (refreshed if needed) encrypted token
//! - `POST /auth/disconnect` - revoke and clear stored credentials
//! - `GET /auth/connector-info` - connection status of every connector
//! - `GET /auth/authorize-url` - provider consent URL for the popup flow
//!
//! Access tokens leave this service encrypted with the token cipher; the
//! browser holds the matching key.

use super::Envelope;
use crate::connector::ConnectorKind;
use crate::lifecycle::{ConnectError, ConnectorStatus, TokenLifecycleManager};
use crate::oauth::ProviderError;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};


/// Shared application state for auth endpoints
#[derive(Clone)]
pub struct AuthAppState {
    pub lifecycle: Arc<TokenLifecycleManager>,
}

/// Request body naming a connector
#[derive(Deserialize, Debug)]
pub struct ConnectorRequest {
    pub connector: String,
}

/// Request body for POST /auth/connect
#[derive(Deserialize, Debug)]
pub struct ConnectRequest {
    pub connector: String,
    #[serde(default)]
    pub auth_code: Option<String>,
    /// PKCE code verifier, if the consent request carried a challenge
    #[serde(default)]
    pub code_verifier: Option<String>,
}

/// Query for GET /auth/authorize-url
#[derive(Deserialize, Debug)]
pub struct AuthorizeUrlQuery {
    pub connector: String,
    pub state: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
}

/// Response for POST /auth/token-refresh
#[derive(Serialize, Debug, Default, PartialEq)]
pub struct TokenRefreshResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub requires_login: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for POST /auth/connect
#[derive(Serialize, Debug, PartialEq)]
pub struct ConnectResponse {
    pub status: String,
    pub access_token: String,
    pub expires_in: i64,
    pub email: String,
}

/// Response for POST /auth/disconnect
#[derive(Serialize, Debug, PartialEq)]
pub struct DisconnectResponse {
    pub status: String,
}

/// Status of one connector, as exposed to the browser
#[derive(Serialize, Debug, PartialEq)]
pub struct ConnectorStatusView {
    pub connected: bool,
    pub email: Option<String>,
    pub expires_at: Option<i64>,
}

impl From<ConnectorStatus> for ConnectorStatusView {
    fn from(status: ConnectorStatus) -> Self {
        Self {
            connected: status.connected,
            email: status.identity,
            expires_at: status.expires_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ConnectorInfoData {
    pub connectors: BTreeMap<ConnectorKind, ConnectorStatusView>,
}

/// Response for GET /auth/connector-info
#[derive(Serialize, Debug)]
pub struct ConnectorInfoResponse {
    pub connector: ConnectorInfoData,
}

/// Response for GET /auth/authorize-url
#[derive(Serialize, Debug)]
pub struct AuthorizeUrlResponse {
    pub url: String,
}

/// Body of every error envelope
#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
}

/// Application error types for auth endpoints
#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Conflict(String),
    BadGateway(String),
    ServiceUnavailable(String),
    ServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        Envelope::failure(status, message, ErrorResponse { status: "error" }).into_response()
    }
}

impl From<ConnectError> for AppError {
    fn from(e: ConnectError) -> Self {
        match e {
            ConnectError::AlreadyConnected { .. } => AppError::Conflict(e.to_string()),
            ConnectError::Provider(ProviderError::NotConfigured(connector)) => {
                AppError::ServiceUnavailable(format!("Connector {} is not configured", connector))
            }
            ConnectError::Provider(e) => {
                AppError::BadGateway(format!("Failed to connect to service: {}", e))
            }
            ConnectError::Store(_) => {
                AppError::ServerError("Failed to save connector credentials".to_string())
            }
        }
    }
}

fn parse_connector(name: &str) -> Result<ConnectorKind, AppError> {
    name.parse::<ConnectorKind>()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Create auth API router (mounted under `/auth`)
pub fn create_auth_router(state: AuthAppState) -> Router {
    Router::new()
        .route("/connect", post(connect))
        .route("/token-refresh", post(token_refresh))
        .route("/disconnect", post(disconnect))
        .route("/connector-info", get(connector_info))
        .route("/authorize-url", get(authorize_url))
        .with_state(Arc::new(state))
}

/// POST /auth/connect - Exchange an authorization code and store credentials
async fn connect(
    State(state): State<Arc<AuthAppState>>,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Envelope<ConnectResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let connector = parse_connector(&request.connector)?;

    let auth_code = match request.auth_code.as_deref() {
        Some(code) if !code.is_empty() => code,
        _ => {
            return Err(AppError::BadRequest(
                "Missing auth_code for connection".to_string(),
            ))
        }
    };

    let outcome = state
        .lifecycle
        .connect(connector, auth_code, request.code_verifier.as_deref())
        .await
        .map_err(|e| {
            error!(connector = %connector, error = %e, "Connect failed");
            AppError::from(e)
        })?;

    info!(connector = %connector, identity = %outcome.identity, "Connect succeeded");

    Ok(Envelope::ok(ConnectResponse {
        status: "success".to_string(),
        access_token: outcome.access_token,
        expires_in: outcome.expires_in,
        email: outcome.identity,
    }))
}

/// POST /auth/token-refresh - Return a valid encrypted access token
///
/// Responds 401 with `requires_login: true` when the connector must be
/// reconnected.
async fn token_refresh(
    State(state): State<Arc<AuthAppState>>,
    payload: Result<Json<ConnectorRequest>, JsonRejection>,
) -> Result<Envelope<TokenRefreshResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let connector = parse_connector(&request.connector)?;

    match state.lifecycle.get_valid_token(connector).await {
        Some(access_token) => Ok(Envelope::ok(TokenRefreshResponse {
            access_token: Some(access_token),
            ..TokenRefreshResponse::default()
        })),
        None => {
            warn!(connector = %connector, "No valid token available");
            let message = "Failed to refresh token - please reconnect";
            Ok(Envelope::failure(
                StatusCode::UNAUTHORIZED,
                message,
                TokenRefreshResponse {
                    access_token: None,
                    requires_login: true,
                    message: Some(message.to_string()),
                },
            ))
        }
    }
}

/// POST /auth/disconnect - Revoke and clear the connector's credentials
async fn disconnect(
    State(state): State<Arc<AuthAppState>>,
    payload: Result<Json<ConnectorRequest>, JsonRejection>,
) -> Result<Envelope<DisconnectResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let connector = parse_connector(&request.connector)?;

    if !state.lifecycle.disconnect(connector).await {
        warn!(connector = %connector, "Disconnect did not complete");
        return Err(AppError::ServerError(
            "Failed to disconnect from service.".to_string(),
        ));
    }

    info!(connector = %connector, "Disconnect succeeded");
    Ok(Envelope::ok(DisconnectResponse {
        status: "success".to_string(),
    }))
}

/// GET /auth/connector-info - Connection status of every connector
async fn connector_info(State(state): State<Arc<AuthAppState>>) -> Envelope<ConnectorInfoResponse> {
    let connectors = state
        .lifecycle
        .connector_info()
        .await
        .into_iter()
        .map(|(kind, status)| (kind, ConnectorStatusView::from(status)))
        .collect();

    Envelope::ok(ConnectorInfoResponse {
        connector: ConnectorInfoData { connectors },
    })
}

/// GET /auth/authorize-url - Provider consent URL for the popup code flow
async fn authorize_url(
    State(state): State<Arc<AuthAppState>>,
    query: Result<Query<AuthorizeUrlQuery>, QueryRejection>,
) -> Result<Envelope<AuthorizeUrlResponse>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let connector = parse_connector(&query.connector)?;

    let url = state
        .lifecycle
        .gateway()
        .authorization_url(connector, &query.state, query.code_challenge.as_deref())
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

    Ok(Envelope::ok(AuthorizeUrlResponse { url }))
}
