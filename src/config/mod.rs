//! Service configuration.
//!
//! Loaded from an optional TOML file, then overridden from environment
//! variables. Every section has defaults so an empty file (or no file) is valid;
//! only the cipher secret and connector client credentials must come from
//! somewhere.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Default config file, overridable with `TOKENKEEPER_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "tokenkeeper.toml";

/// Complete service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub cipher: CipherConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Origins allowed by CORS
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:3001".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Credential database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "credentials.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Outbound HTTP client configuration (provider calls)
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total deadline for one provider request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

fn default_connect_timeout() -> u64 {
    20
}

fn default_request_timeout() -> u64 {
    180
}

fn default_pool_idle_timeout() -> u64 {
    60
}

fn default_pool_max_idle() -> usize {
    200
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

/// Token lifecycle policy
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    /// Tokens expiring within this many seconds are refreshed
    #[serde(default = "default_expiry_buffer")]
    pub expiry_buffer_secs: i64,
    /// Disconnect even when a refresh fails for a transient reason
    /// (timeout, 5xx, 429). Off by default: only permanent failures disconnect.
    #[serde(default)]
    pub disconnect_on_transient_refresh_failure: bool,
}

fn default_expiry_buffer() -> i64 {
    60
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: default_expiry_buffer(),
            disconnect_on_transient_refresh_failure: false,
        }
    }
}

/// Token encryption configuration
#[derive(Clone, Default, Deserialize)]
pub struct CipherConfig {
    /// Secret the cipher key is derived from (`ENCRYPTION_KEY`)
    #[serde(default)]
    pub secret: Option<String>,
}

impl std::fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherConfig")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Per-connector OAuth client configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub google_drive: GoogleDriveConfig,
}

/// Google Drive OAuth client and endpoints
#[derive(Clone, Deserialize)]
pub struct GoogleDriveConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_google_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_google_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_google_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_google_token_url")]
    pub token_url: String,
    #[serde(default = "default_google_revoke_url")]
    pub revoke_url: String,
    #[serde(default = "default_google_userinfo_url")]
    pub userinfo_url: String,
    /// Endpoint used to confirm the token can reach Drive
    #[serde(default = "default_google_drive_probe_url")]
    pub drive_probe_url: String,
}

fn default_google_redirect_uri() -> String {
    // Popup code flow: the browser SDK receives the code via postMessage
    "postmessage".to_string()
}

fn default_google_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/drive.readonly".to_string(),
        "https://www.googleapis.com/auth/userinfo.email".to_string(),
    ]
}

fn default_google_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_revoke_url() -> String {
    "https://oauth2.googleapis.com/revoke".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".to_string()
}

fn default_google_drive_probe_url() -> String {
    "https://www.googleapis.com/drive/v3/about?fields=user".to_string()
}

impl GoogleDriveConfig {
    /// Points every endpoint at `base_url` (for testing with a mock server).
    ///
    /// Paths: `/auth`, `/token`, `/revoke`, `/userinfo`, `/drive/about`.
    pub fn with_base_url(base_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            client_secret: Some(client_secret.to_string()),
            auth_url: format!("{}/auth", base_url),
            token_url: format!("{}/token", base_url),
            revoke_url: format!("{}/revoke", base_url),
            userinfo_url: format!("{}/userinfo", base_url),
            drive_probe_url: format!("{}/drive/about", base_url),
            ..Self::default()
        }
    }

    /// True when both client id and secret are present and non-empty.
    pub fn has_client_credentials(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.client_id) && present(&self.client_secret)
    }
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: default_google_redirect_uri(),
            scopes: default_google_scopes(),
            auth_url: default_google_auth_url(),
            token_url: default_google_token_url(),
            revoke_url: default_google_revoke_url(),
            userinfo_url: default_google_userinfo_url(),
            drive_probe_url: default_google_drive_probe_url(),
        }
    }
}

impl std::fmt::Debug for GoogleDriveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// Loads the config file named by `TOKENKEEPER_CONFIG` (or the default path),
    /// then applies environment overrides.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load() -> Result<Self> {
        let path = std::env::var("TOKENKEEPER_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let mut config = if Path::new(&path).exists() {
            load_config(&path)?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overrides settings from environment-style variables.
    ///
    /// `lookup` returns the value for a variable name, if set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENCRYPTION_KEY") {
            self.cipher.secret = Some(v);
        }
        if let Some(v) = lookup("GOOGLE_CLIENT_ID") {
            self.connectors.google_drive.client_id = Some(v);
        }
        if let Some(v) = lookup("GOOGLE_CLIENT_SECRET") {
            self.connectors.google_drive.client_secret = Some(v);
        }
        if let Some(v) = lookup("TOKENKEEPER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = lookup("TOKENKEEPER_DATABASE_PATH") {
            self.database.path = v;
        }
    }
}

/// Load configuration from TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.server.allowed_origins.len(), 2);
        assert_eq!(config.database.path, "credentials.db");
        assert_eq!(config.http.connect_timeout_secs, 20);
        assert_eq!(config.http.request_timeout_secs, 180);
        assert_eq!(config.lifecycle.expiry_buffer_secs, 60);
        assert!(!config.lifecycle.disconnect_on_transient_refresh_failure);
        assert!(config.cipher.secret.is_none());
        assert!(!config.connectors.google_drive.has_client_credentials());
        assert_eq!(config.connectors.google_drive.redirect_uri, "postmessage");
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:9000"

            [database]
            path = "/tmp/creds.db"

            [http]
            connect_timeout_secs = 5
            request_timeout_secs = 30

            [lifecycle]
            expiry_buffer_secs = 120
            disconnect_on_transient_refresh_failure = true

            [cipher]
            secret = "file-secret"

            [connectors.google_drive]
            client_id = "id-from-file"
            client_secret = "secret-from-file"
        "#;

        let config: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        // Unset fields keep their defaults
        assert_eq!(config.server.allowed_origins.len(), 2);
        assert_eq!(config.database.path, "/tmp/creds.db");
        assert_eq!(config.http.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.http.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.http.pool_max_idle_per_host, 200);
        assert_eq!(config.lifecycle.expiry_buffer_secs, 120);
        assert!(config.lifecycle.disconnect_on_transient_refresh_failure);
        assert_eq!(config.cipher.secret.as_deref(), Some("file-secret"));
        assert!(config.connectors.google_drive.has_client_credentials());
        assert_eq!(
            config.connectors.google_drive.token_url,
            "https://oauth2.googleapis.com/token"
        );
    }

    #[test]
    fn test_partial_config() {
        let config: AppConfig = toml::from_str("[database]\npath = \":memory:\"\n").unwrap();
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ENCRYPTION_KEY", "env-secret"),
            ("GOOGLE_CLIENT_ID", "env-id"),
            ("GOOGLE_CLIENT_SECRET", "env-client-secret"),
            ("TOKENKEEPER_DATABASE_PATH", "env.db"),
        ]
        .into_iter()
        .collect();

        let mut config: AppConfig = toml::from_str("[cipher]\nsecret = \"file-secret\"\n").unwrap();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.cipher.secret.as_deref(), Some("env-secret"));
        assert_eq!(config.connectors.google_drive.client_id.as_deref(), Some("env-id"));
        assert!(config.connectors.google_drive.has_client_credentials());
        assert_eq!(config.database.path, "env.db");
        // Not overridden
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_empty_client_credentials_not_configured() {
        let mut google = GoogleDriveConfig::default();
        google.client_id = Some("id".to_string());
        google.client_secret = Some(String::new());
        assert!(!google.has_client_credentials());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenkeeper.toml");
        std::fs::write(&path, "[server]\nbind_addr = \"127.0.0.1:8123\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:8123");

        std::fs::write(&path, "[server\nbroken").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let mut config = AppConfig::default();
        config.cipher.secret = Some("super-secret".to_string());
        config.connectors.google_drive.client_secret = Some("client-secret".to_string());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("client-secret"));
    }

    #[test]
    fn test_google_base_url_override() {
        let google = GoogleDriveConfig::with_base_url("http://127.0.0.1:1234", "id", "secret");
        assert_eq!(google.token_url, "http://127.0.0.1:1234/token");
        assert_eq!(google.drive_probe_url, "http://127.0.0.1:1234/drive/about");
        assert!(google.has_client_credentials());
    }
}
