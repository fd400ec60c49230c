//! Configuration module for the relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use chat_voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("relay.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod env;
mod merge;
mod validation;
mod yaml;

pub use merge::{
    DEFAULT_HOST, DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_PLATFORM_CONCURRENCY, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_RPS, DEFAULT_RESPONSE_TIMEOUT_MS,
    DEFAULT_SERVICE_TIMEOUT_SECONDS,
};
pub use yaml::YamlConfig;

use crate::core::platform::PlatformConfig;

/// Errors raised while loading or validating configuration. All are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the relay, including:
/// - Server settings (host, port, TLS)
/// - Conversational platform connection
/// - External conversation service
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Platform settings
    pub platform_server: String,
    pub platform_api_key: String,
    /// Maximum conversations scheduled on the platform at once
    pub platform_concurrency: usize,

    // External service settings
    /// Base URL of the conversation service; echo service when unset
    pub external_service_url: Option<String>,
    pub external_service_timeout_seconds: u64,

    /// How long `get_chatbot_input` waits for a response
    pub response_timeout_ms: u64,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

/// Zeroize the platform key when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        self.platform_api_key.zeroize();
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("platform_server", &self.platform_server)
            .field("platform_api_key", &"<redacted>")
            .field("platform_concurrency", &self.platform_concurrency)
            .field("external_service_url", &self.external_service_url)
            .field(
                "external_service_timeout_seconds",
                &self.external_service_timeout_seconds,
            )
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field(
                "rate_limit_requests_per_second",
                &self.rate_limit_requests_per_second,
            )
            .field("rate_limit_burst_size", &self.rate_limit_burst_size)
            .field("max_websocket_connections", &self.max_websocket_connections)
            .field("max_connections_per_ip", &self.max_connections_per_ip)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// Note: .env file is loaded in main.rs at application startup.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or a required
    /// platform setting is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed,
    /// environment variables have invalid formats, or validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Settings for the platform client.
    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            server: self.platform_server.clone(),
            api_key: self.platform_api_key.clone(),
            concurrency: self.platform_concurrency,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// Minimal valid configuration for unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 8080,
        tls: None,
        platform_server: "app.us.example.com".to_string(),
        platform_api_key: "test-key".to_string(),
        platform_concurrency: 2,
        external_service_url: None,
        external_service_timeout_seconds: DEFAULT_SERVICE_TIMEOUT_SECONDS,
        response_timeout_ms: 500,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: DEFAULT_RATE_LIMIT_RPS,
        rate_limit_burst_size: DEFAULT_RATE_LIMIT_BURST,
        max_websocket_connections: None,
        max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
    }
}
