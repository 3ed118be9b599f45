//! HTTP API.
//!
//! Thin axum layer over [`TokenLifecycleManager`]. Every `/auth` response uses
//! the same envelope:
//!
//! ```json
//! { "code": 200, "success": true, "message": "success", "response": { ... } }
//! ```
//!
//! The envelope `code` always equals the HTTP status.

pub mod auth;

pub use auth::{create_auth_router, AuthAppState};

use crate::lifecycle::TokenLifecycleManager;
use axum::{
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, CorsLayer};

/// Name reported by `GET /`
pub const SERVICE_NAME: &str = "tokenkeeper";

/// Response envelope shared by all `/auth` endpoints
#[derive(Serialize, Debug)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub success: bool,
    pub message: String,
    pub response: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(response: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            success: true,
            message: "success".to_string(),
            response,
        }
    }

    pub fn failure(status: StatusCode, message: impl Into<String>, response: T) -> Self {
        Self {
            code: status.as_u16(),
            success: false,
            message: message.into(),
            response,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Serialize)]
struct ServiceStatus {
    status: &'static str,
    service: &'static str,
}

/// Create the full application router
///
/// # Arguments
/// * `lifecycle` - Token lifecycle manager shared by all handlers
/// * `allowed_origins` - CORS origins; unparsable entries and `*` are skipped
pub fn create_router(lifecycle: Arc<TokenLifecycleManager>, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/auth", create_auth_router(AuthAppState { lifecycle }))
        .layer(cors_layer(allowed_origins))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            // Wildcards cannot be combined with credentials
            Ok(value) if value != "*" => Some(value),
            _ => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// GET / - Service banner
async fn root() -> Json<ServiceStatus> {
    Json(ServiceStatus {
        status: "ok",
        service: SERVICE_NAME,
    })
}

/// GET /health - Liveness probe
async fn health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization() {
        let envelope = Envelope::ok(serde_json::json!({"status": "success"}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["code"], 200);
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "success");
        assert_eq!(json["response"]["status"], "success");
    }

    #[test]
    fn test_failure_envelope_status() {
        let envelope = Envelope::failure(StatusCode::CONFLICT, "already connected", ());
        assert_eq!(envelope.code, 409);
        assert!(!envelope.success);

        let response = envelope.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_cors_layer_skips_invalid_origins() {
        // Must not panic on a header-invalid origin
        let _layer = cors_layer(&[
            "http://localhost:3000".to_string(),
            "bad\norigin".to_string(),
            "*".to_string(),
        ]);
    }
}
