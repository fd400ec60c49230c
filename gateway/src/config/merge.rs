use std::path::PathBuf;

use super::env::EnvConfig;
use super::yaml::YamlConfig;
use super::{ConfigError, ServerConfig, TlsConfig};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PLATFORM_CONCURRENCY: usize = 2;
pub const DEFAULT_SERVICE_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 60;
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Build the server configuration from the environment, letting YAML values
/// win where both are set.
///
/// Priority: YAML > environment (including `.env`) > defaults.
/// Required values are checked later by `validation`; here they may still be
/// empty.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let tls_yaml = server.tls.unwrap_or_default();
    let platform = yaml.platform.unwrap_or_default();
    let service = yaml.service.unwrap_or_default();
    let relay = yaml.relay.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let tls_enabled = tls_yaml.enabled.or(env.tls_enabled).unwrap_or(false);
    let tls = if tls_enabled {
        let cert_path = tls_yaml
            .cert_path
            .or(env.tls_cert_path)
            .ok_or(ConfigError::Missing("TLS_CERT_PATH"))?;
        let key_path = tls_yaml
            .key_path
            .or(env.tls_key_path)
            .ok_or(ConfigError::Missing("TLS_KEY_PATH"))?;
        Some(TlsConfig {
            cert_path: PathBuf::from(cert_path),
            key_path: PathBuf::from(key_path),
        })
    } else {
        None
    };

    Ok(ServerConfig {
        host: server
            .host
            .or(env.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        port: server.port.or(env.port).unwrap_or(DEFAULT_PORT),
        tls,

        platform_server: platform.server.or(env.platform_server).unwrap_or_default(),
        platform_api_key: platform
            .api_key
            .or(env.platform_api_key)
            .unwrap_or_default(),
        platform_concurrency: platform
            .concurrency
            .or(env.platform_concurrency)
            .unwrap_or(DEFAULT_PLATFORM_CONCURRENCY),

        external_service_url: service.url.or(env.external_service_url),
        external_service_timeout_seconds: service
            .timeout_seconds
            .or(env.external_service_timeout_seconds)
            .unwrap_or(DEFAULT_SERVICE_TIMEOUT_SECONDS),

        response_timeout_ms: relay
            .response_timeout_ms
            .or(env.response_timeout_ms)
            .unwrap_or(DEFAULT_RESPONSE_TIMEOUT_MS),

        cors_allowed_origins: security
            .cors_allowed_origins
            .or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .or(env.rate_limit_requests_per_second)
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .or(env.rate_limit_burst_size)
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .or(env.max_connections_per_ip)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}
