// Integration tests for the auth API

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use mockito::{Matcher, Server, ServerGuard};
use std::sync::Arc;
use tokenkeeper::api::create_router;
use tokenkeeper::config::{ConnectorsConfig, GoogleDriveConfig, LifecycleConfig};
use tokenkeeper::credentials::{SqliteCredentialStore, TokenCipher};
use tokenkeeper::lifecycle::TokenLifecycleManager;
use tokenkeeper::oauth::ProviderGateway;
use tower::ServiceExt;

const SECRET: &str = "integration-test-secret";

fn create_test_app(server: Option<&ServerGuard>) -> Router {
    let connectors = match server {
        Some(server) => ConnectorsConfig {
            google_drive: GoogleDriveConfig::with_base_url(&server.url(), "client-id", "client-secret"),
        },
        None => ConnectorsConfig::default(),
    };

    let store = Arc::new(SqliteCredentialStore::open(":memory:").unwrap());
    let gateway = Arc::new(ProviderGateway::new(reqwest::Client::new(), &connectors));
    let lifecycle = Arc::new(TokenLifecycleManager::new(
        store,
        TokenCipher::new(SECRET).unwrap(),
        gateway,
        LifecycleConfig::default(),
    ));

    create_router(lifecycle, &["http://localhost:3000".to_string()])
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

async fn mock_google(server: &mut ServerGuard) {
    server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT1","refresh_token":"RT1","expires_in":3600}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/userinfo")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"email":"a@x.com"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/drive/about")
        .with_status(200)
        .with_body(r#"{"user":{}}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/revoke")
        .match_query(Matcher::Any)
        .with_status(200)
        .create_async()
        .await;
}

fn decrypt(ciphertext: &serde_json::Value) -> String {
    let cipher = TokenCipher::new(SECRET).unwrap();
    cipher
        .decrypt(ciphertext.as_str().unwrap())
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let app = create_test_app(None);

    let (status, json) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "tokenkeeper");

    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_connect_refresh_disconnect_flow() {
    let mut server = Server::new_async().await;
    mock_google(&mut server).await;
    let app = create_test_app(Some(&server));

    // Connect
    let (status, json) = send(
        &app,
        post_json("/auth/connect", r#"{"connector":"googleDrive","auth_code":"code-1"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["code"], 200);
    assert_eq!(json["success"], true);
    assert_eq!(json["response"]["status"], "success");
    assert_eq!(json["response"]["email"], "a@x.com");
    assert_eq!(json["response"]["expires_in"], 3600);
    assert_ne!(json["response"]["access_token"], "AT1");
    assert_eq!(decrypt(&json["response"]["access_token"]), "AT1");

    // Connector info
    let (status, json) = send(&app, get("/auth/connector-info")).await;
    assert_eq!(status, StatusCode::OK);
    let drive = &json["response"]["connector"]["connectors"]["googleDrive"];
    assert_eq!(drive["connected"], true);
    assert_eq!(drive["email"], "a@x.com");
    assert!(drive["expires_at"].as_i64().is_some());

    // Token refresh (still fresh, re-encrypted)
    let (status, json) = send(
        &app,
        post_json("/auth/token-refresh", r#"{"connector":"googleDrive"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["response"]["requires_login"], false);
    assert_eq!(decrypt(&json["response"]["access_token"]), "AT1");

    // Disconnect
    let (status, json) = send(
        &app,
        post_json("/auth/disconnect", r#"{"connector":"googleDrive"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["response"]["status"], "success");

    let (_, json) = send(&app, get("/auth/connector-info")).await;
    let drive = &json["response"]["connector"]["connectors"]["googleDrive"];
    assert_eq!(drive["connected"], false);
    assert!(drive["email"].is_null());

    // No token after disconnect
    let (status, json) = send(
        &app,
        post_json("/auth/token-refresh", r#"{"connector":"googleDrive"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["success"], false);
    assert_eq!(json["response"]["requires_login"], true);
}

#[tokio::test]
async fn test_connect_missing_auth_code() {
    let app = create_test_app(None);

    let (status, json) = send(&app, post_json("/auth/connect", r#"{"connector":"googleDrive"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], 400);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Missing auth_code for connection");
    assert_eq!(json["response"]["status"], "error");
}

#[tokio::test]
async fn test_unknown_connector_rejected() {
    let app = create_test_app(None);

    let (status, json) = send(
        &app,
        post_json("/auth/token-refresh", r#"{"connector":"dropbox"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = create_test_app(None);

    let (status, json) = send(&app, post_json("/auth/disconnect", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["response"]["status"], "error");
}

#[tokio::test]
async fn test_connect_unconfigured_connector() {
    let app = create_test_app(None);

    let (status, json) = send(
        &app,
        post_json("/auth/connect", r#"{"connector":"googleDrive","auth_code":"code"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_connect_provider_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/token")
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;
    let app = create_test_app(Some(&server));

    let (status, json) = send(
        &app,
        post_json("/auth/connect", r#"{"connector":"googleDrive","auth_code":"stale"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], 502);

    let (_, json) = send(&app, get("/auth/connector-info")).await;
    assert_eq!(
        json["response"]["connector"]["connectors"]["googleDrive"]["connected"],
        false
    );
}

#[tokio::test]
async fn test_disconnect_without_connection() {
    let app = create_test_app(None);

    let (status, json) = send(
        &app,
        post_json("/auth/disconnect", r#"{"connector":"googleDrive"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["response"]["status"], "error");
}

#[tokio::test]
async fn test_authorize_url() {
    let server = Server::new_async().await;
    let app = create_test_app(Some(&server));

    let (status, json) = send(
        &app,
        get("/auth/authorize-url?connector=googleDrive&state=abc123"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let url = json["response"]["url"].as_str().unwrap();
    assert!(url.starts_with(&format!("{}/auth?", server.url())));
    assert!(url.contains("state=abc123"));
    assert!(url.contains("access_type=offline"));

    // Missing state
    let (status, _) = send(&app, get("/auth/authorize-url?connector=googleDrive")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cors_preflight_allows_configured_origin() {
    let app = create_test_app(None);

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/auth/connect")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
}
