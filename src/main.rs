use anyhow::{Context, Result};
use std::sync::Arc;
use tokenkeeper::api::create_router;
use tokenkeeper::config::AppConfig;
use tokenkeeper::credentials::{SqliteCredentialStore, TokenCipher};
use tokenkeeper::lifecycle::TokenLifecycleManager;
use tokenkeeper::oauth::{build_http_client, ProviderGateway};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenkeeper=info".into()),
        )
        .init();

    info!("Tokenkeeper starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.database.path,
        expiry_buffer_secs = config.lifecycle.expiry_buffer_secs,
        "Configuration loaded"
    );

    let secret = config
        .cipher
        .secret
        .as_deref()
        .context("ENCRYPTION_KEY is required")?;
    let cipher = TokenCipher::new(secret).context("Invalid encryption secret")?;

    let store = Arc::new(
        SqliteCredentialStore::open(&config.database.path)
            .context("Failed to initialize credential store")?,
    );
    info!("Credential store initialized");

    let http_client = build_http_client(&config.http).context("Failed to build HTTP client")?;
    let gateway = Arc::new(ProviderGateway::new(http_client, &config.connectors));

    let lifecycle = Arc::new(TokenLifecycleManager::new(
        store,
        cipher,
        gateway,
        config.lifecycle.clone(),
    ));

    let router = create_router(lifecycle, &config.server.allowed_origins);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Tokenkeeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        // Without a signal handler, run until killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
