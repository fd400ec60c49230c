use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional so a file may configure only part of the server;
/// anything left out falls back to environment variables and then defaults.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 8080
///   tls:
///     enabled: true
///     cert_path: "/etc/relay/cert.pem"
///     key_path: "/etc/relay/key.pem"
///
/// platform:
///   server: "app.us.example.com"
///   api_key: "your-platform-key"
///   concurrency: 4
///
/// service:
///   url: "http://chatbot.internal:9000"
///   timeout_seconds: 10
///
/// relay:
///   response_timeout_ms: 10000
///
/// security:
///   cors_allowed_origins: "https://app.example.com"
///   rate_limit_requests_per_second: 60
///   rate_limit_burst_size: 10
///   max_websocket_connections: 1000
///   max_connections_per_ip: 100
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub platform: Option<PlatformYaml>,
    pub service: Option<ServiceYaml>,
    pub relay: Option<RelayYaml>,
    pub security: Option<SecurityYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub enabled: Option<bool>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Conversational platform connection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PlatformYaml {
    pub server: Option<String>,
    pub api_key: Option<String>,
    pub concurrency: Option<usize>,
}

/// External conversation service from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceYaml {
    pub url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Relay tuning from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RelayYaml {
    pub response_timeout_ms: Option<u64>,
}

/// Security configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// CORS allowed origins (comma-separated list or "*")
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: Option<u32>,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: Option<u32>,
    /// Maximum concurrent WebSocket connections
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    pub max_connections_per_ip: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed
    /// or has fields of the wrong type.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;

        let config: YamlConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090
  tls:
    enabled: true
    cert_path: "/certs/cert.pem"
    key_path: "/certs/key.pem"

platform:
  server: "app.us.example.com"
  api_key: "pk-123"
  concurrency: 4

service:
  url: "http://bot.local:9000"
  timeout_seconds: 5

relay:
  response_timeout_ms: 2500

security:
  cors_allowed_origins: "*"
  rate_limit_requests_per_second: 100
  rate_limit_burst_size: 20
  max_websocket_connections: 500
  max_connections_per_ip: 10
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let server = config.server.unwrap();
        assert_eq!(server.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(server.port, Some(9090));
        let tls = server.tls.unwrap();
        assert_eq!(tls.enabled, Some(true));
        assert_eq!(tls.cert_path.as_deref(), Some("/certs/cert.pem"));

        let platform = config.platform.unwrap();
        assert_eq!(platform.server.as_deref(), Some("app.us.example.com"));
        assert_eq!(platform.api_key.as_deref(), Some("pk-123"));
        assert_eq!(platform.concurrency, Some(4));

        let service = config.service.unwrap();
        assert_eq!(service.url.as_deref(), Some("http://bot.local:9000"));
        assert_eq!(service.timeout_seconds, Some(5));

        assert_eq!(config.relay.unwrap().response_timeout_ms, Some(2500));

        let security = config.security.unwrap();
        assert_eq!(security.cors_allowed_origins.as_deref(), Some("*"));
        assert_eq!(security.max_websocket_connections, Some(500));
        assert_eq!(security.max_connections_per_ip, Some(10));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
platform:
  concurrency: 1
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.server.is_none());
        let platform = config.platform.unwrap();
        assert_eq!(platform.concurrency, Some(1));
        assert!(platform.server.is_none());
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.server.is_none());
        assert!(config.platform.is_none());
        assert!(config.security.is_none());
    }

    #[test]
    fn test_yaml_config_wrong_type() {
        let result = serde_yaml::from_str::<YamlConfig>("platform:\n  concurrency: many\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relay.yaml");
        fs::write(&path, "server:\n  port: 7000\n").unwrap();

        let config = YamlConfig::from_file(&path).unwrap();
        assert_eq!(config.server.unwrap().port, Some(7000));
    }

    #[test]
    fn test_from_file_not_found() {
        let err = YamlConfig::from_file(Path::new("/nonexistent/relay.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("invalid.yaml");
        fs::write(&path, "invalid: yaml: [content").unwrap();

        let err = YamlConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML"));
    }
}
