use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Vendor transport configuration shared by every completion call
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// HTTPS proxy for outbound vendor traffic
    #[serde(default)]
    pub https_proxy: Option<Url>,
    /// Request timeout for vendor calls (e.g. "2m", "90s")
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    /// Retry count used when a call does not specify one
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Langfuse Cloud region; any value marks the deployment as cloud
    #[serde(default)]
    pub cloud_region: Option<String>,
    /// Self-hosted PowerRAG endpoint
    #[serde(default)]
    pub power_rag: PowerRagConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            https_proxy: None,
            request_timeout: default_request_timeout(),
            default_max_retries: default_max_retries(),
            cloud_region: None,
            power_rag: PowerRagConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Parsed vendor request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if `request_timeout` is not a valid duration
    pub fn timeout(&self) -> anyhow::Result<Duration> {
        duration_str::parse(&self.request_timeout)
            .map_err(|e| anyhow::anyhow!("invalid llm.request_timeout '{}': {e}", self.request_timeout))
    }

    /// Whether this deployment runs as Langfuse Cloud
    pub fn is_cloud(&self) -> bool {
        self.cloud_region.as_deref().is_some_and(|r| !r.trim().is_empty())
    }
}

/// Location of the PowerRAG chat-messages API
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerRagConfig {
    /// URL scheme
    #[serde(default = "default_power_rag_protocol")]
    pub protocol: String,
    /// Host name
    #[serde(default = "default_power_rag_host")]
    pub host: String,
    /// Port
    #[serde(default = "default_power_rag_port")]
    pub port: u16,
    /// User identifier sent with every query
    #[serde(default = "default_power_rag_user")]
    pub user: String,
}

impl Default for PowerRagConfig {
    fn default() -> Self {
        Self {
            protocol: default_power_rag_protocol(),
            host: default_power_rag_host(),
            port: default_power_rag_port(),
            user: default_power_rag_user(),
        }
    }
}

impl PowerRagConfig {
    /// Chat-messages endpoint derived from protocol, host and port
    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}/v1/chat-messages", self.protocol, self.host, self.port)
    }
}

fn default_request_timeout() -> String {
    "2m".to_owned()
}

const fn default_max_retries() -> u32 {
    2
}

fn default_power_rag_protocol() -> String {
    "http".to_owned()
}

fn default_power_rag_host() -> String {
    "localhost".to_owned()
}

const fn default_power_rag_port() -> u16 {
    80
}

fn default_power_rag_user() -> String {
    "abc-123".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_two_minutes() {
        let config = LlmConfig::default();
        assert_eq!(config.timeout().unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn blank_cloud_region_is_not_cloud() {
        let mut config = LlmConfig::default();
        assert!(!config.is_cloud());
        config.cloud_region = Some("  ".to_owned());
        assert!(!config.is_cloud());
        config.cloud_region = Some("EU".to_owned());
        assert!(config.is_cloud());
    }

    #[test]
    fn power_rag_endpoint_includes_port() {
        let config = PowerRagConfig {
            protocol: "https".to_owned(),
            host: "rag.example.com".to_owned(),
            port: 8443,
            user: "abc-123".to_owned(),
        };
        assert_eq!(config.endpoint(), "https://rag.example.com:8443/v1/chat-messages");
    }
}
