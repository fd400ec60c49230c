//! Environment variable loading.
//!
//! Values are read raw here; defaults are applied in `merge` so YAML can sit
//! between the two.

use std::env;
use std::fmt::Display;
use std::str::FromStr;

use super::ConfigError;

/// Configuration values present in the environment.
#[derive(Debug, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_enabled: Option<bool>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub platform_server: Option<String>,
    pub platform_api_key: Option<String>,
    pub platform_concurrency: Option<usize>,
    pub external_service_url: Option<String>,
    pub external_service_timeout_seconds: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host: string_var("HOST"),
            port: parse_var("PORT")?,
            tls_enabled: bool_var("TLS_ENABLED")?,
            tls_cert_path: string_var("TLS_CERT_PATH"),
            tls_key_path: string_var("TLS_KEY_PATH"),
            platform_server: string_var("PLATFORM_SERVER"),
            platform_api_key: string_var("PLATFORM_API_KEY"),
            platform_concurrency: parse_var("PLATFORM_CONCURRENCY")?,
            external_service_url: string_var("EXTERNAL_SERVICE_URL"),
            external_service_timeout_seconds: parse_var("EXTERNAL_SERVICE_TIMEOUT_SECONDS")?,
            response_timeout_ms: parse_var("RESPONSE_TIMEOUT_MS")?,
            cors_allowed_origins: string_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_var("RATE_LIMIT_REQUESTS_PER_SECOND")?,
            rate_limit_burst_size: parse_var("RATE_LIMIT_BURST_SIZE")?,
            max_websocket_connections: parse_var("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: parse_var("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}

/// Non-empty, trimmed value of a variable.
fn string_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    string_var(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn bool_var(name: &'static str) -> Result<Option<bool>, ConfigError> {
    string_var(name)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: name,
                value: raw.clone(),
                reason: "expected true or false".to_string(),
            }),
        })
        .transpose()
}
