use url::Url;

use super::{ConfigError, ServerConfig};

/// Run every check against a merged configuration.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_platform(config)?;
    validate_service_url(&config.external_service_url)?;
    validate_limits(config)?;
    validate_tls(config)?;
    Ok(())
}

/// The relay cannot do anything without a platform to talk to.
pub fn validate_platform(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.platform_server.is_empty() {
        return Err(ConfigError::Missing("PLATFORM_SERVER"));
    }
    if config.platform_api_key.is_empty() {
        return Err(ConfigError::Missing("PLATFORM_API_KEY"));
    }
    if config.platform_concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            key: "PLATFORM_CONCURRENCY",
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    config
        .platform_config()
        .endpoint_url()
        .map_err(|e| ConfigError::InvalidValue {
            key: "PLATFORM_SERVER",
            value: config.platform_server.clone(),
            reason: e.to_string(),
        })?;
    Ok(())
}

pub fn validate_service_url(url: &Option<String>) -> Result<(), ConfigError> {
    let Some(raw) = url else {
        return Ok(());
    };
    let parsed = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: "EXTERNAL_SERVICE_URL",
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidValue {
            key: "EXTERNAL_SERVICE_URL",
            value: raw.clone(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

pub fn validate_limits(config: &ServerConfig) -> Result<(), ConfigError> {
    let positive = [
        ("RESPONSE_TIMEOUT_MS", config.response_timeout_ms),
        (
            "EXTERNAL_SERVICE_TIMEOUT_SECONDS",
            config.external_service_timeout_seconds,
        ),
        (
            "RATE_LIMIT_REQUESTS_PER_SECOND",
            config.rate_limit_requests_per_second as u64,
        ),
        ("RATE_LIMIT_BURST_SIZE", config.rate_limit_burst_size as u64),
        ("MAX_CONNECTIONS_PER_IP", config.max_connections_per_ip as u64),
    ];
    for (key, value) in positive {
        if value == 0 {
            return Err(ConfigError::InvalidValue {
                key,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
    }
    if config.max_websocket_connections == Some(0) {
        return Err(ConfigError::InvalidValue {
            key: "MAX_WEBSOCKET_CONNECTIONS",
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

/// Certificate and key must exist before the listener is bound.
pub fn validate_tls(config: &ServerConfig) -> Result<(), ConfigError> {
    let Some(tls) = &config.tls else {
        return Ok(());
    };
    for (key, path) in [("TLS_CERT_PATH", &tls.cert_path), ("TLS_KEY_PATH", &tls.key_path)] {
        if !path.is_file() {
            return Err(ConfigError::InvalidValue {
                key,
                value: path.display().to_string(),
                reason: "file not found".to_string(),
            });
        }
    }
    Ok(())
}
