// Supported connector kinds
pub mod connector;

// Encrypted credential storage
pub mod credentials;

// Provider gateway (OAuth2 adapters)
pub mod oauth;

// Connect / refresh / disconnect orchestration
pub mod lifecycle;

// Service configuration
pub mod config;

// HTTP API
pub mod api;
