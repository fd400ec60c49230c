use url::Url;

use super::base::{PlatformError, PlatformResult};

/// Path of the relay endpoint on the platform server.
pub const RELAY_PATH: &str = "/relay/v1";

/// Connection settings for the platform client.
#[derive(Clone)]
pub struct PlatformConfig {
    /// Host (optionally with scheme and port) of the platform server
    pub server: String,
    pub api_key: String,
    /// Maximum number of conversations scheduled at once
    pub concurrency: usize,
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("server", &self.server)
            .field("api_key", &"<redacted>")
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl PlatformConfig {
    /// WebSocket URL of the relay endpoint.
    ///
    /// A bare host becomes `wss://<host>/relay/v1`; explicit `ws://` or
    /// `wss://` servers keep their scheme.
    pub fn endpoint_url(&self) -> PlatformResult<Url> {
        let server = self.server.trim().trim_end_matches('/');
        if server.is_empty() {
            return Err(PlatformError::InvalidConfiguration(
                "platform server is empty".to_string(),
            ));
        }

        let base = if server.contains("://") {
            server.to_string()
        } else {
            format!("wss://{server}")
        };
        let url = Url::parse(&format!("{base}{RELAY_PATH}"))
            .map_err(|e| PlatformError::InvalidConfiguration(format!("{server}: {e}")))?;

        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(PlatformError::InvalidConfiguration(format!(
                "unsupported platform scheme '{other}'"
            ))),
        }
    }

    /// Host name of the platform server.
    pub fn host(&self) -> PlatformResult<String> {
        self.endpoint_url()?
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| PlatformError::InvalidConfiguration("platform server has no host".into()))
    }

    /// SIP domain paired with the platform server: a leading `app.` label
    /// is swapped for `sip.`, any other host is used as is.
    pub fn sip_domain(&self) -> PlatformResult<String> {
        let host = self.host()?;
        Ok(match host.strip_prefix("app.") {
            Some(rest) => format!("sip.{rest}"),
            None => host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server: &str) -> PlatformConfig {
        PlatformConfig {
            server: server.to_string(),
            api_key: "key".to_string(),
            concurrency: 2,
        }
    }

    #[test]
    fn test_bare_host_defaults_to_wss() {
        let url = config("app.us.example.com").endpoint_url().unwrap();
        assert_eq!(url.as_str(), "wss://app.us.example.com/relay/v1");
    }

    #[test]
    fn test_explicit_scheme_is_kept() {
        let url = config("ws://127.0.0.1:9000/").endpoint_url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/relay/v1");
    }

    #[test]
    fn test_http_scheme_rejected() {
        assert!(config("https://app.example.com").endpoint_url().is_err());
        assert!(config("  ").endpoint_url().is_err());
    }

    #[test]
    fn test_sip_domain() {
        assert_eq!(
            config("app.us.example.com").sip_domain().unwrap(),
            "sip.us.example.com"
        );
        assert_eq!(
            config("platform.example.com").sip_domain().unwrap(),
            "platform.example.com"
        );
    }

    #[test]
    fn test_debug_redacts_key() {
        let rendered = format!("{:?}", config("app.example.com"));
        assert!(!rendered.contains("key\""));
        assert!(rendered.contains("<redacted>"));
    }
}
