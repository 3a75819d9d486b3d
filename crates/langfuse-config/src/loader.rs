use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::{Config, IngestionConfig, LlmConfig, PowerRagConfig};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// resolved, the TOML is malformed, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded = crate::env::expand_env(&raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Build configuration from the process environment
    ///
    /// Reads `HTTPS_PROXY`, `LANGFUSE_POWERRAG_PROTOCOL`, `LANGFUSE_POWERRAG_HOST`,
    /// `LANGFUSE_POWERRAG_PORT`, `NEXT_PUBLIC_LANGFUSE_CLOUD_REGION`,
    /// `LANGFUSE_PROJECT_ID`, `LANGFUSE_HOST`, `LANGFUSE_PUBLIC_KEY` and
    /// `LANGFUSE_SECRET_KEY`. Unset or blank variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparseable value or the
    /// result fails validation
    pub fn from_env() -> anyhow::Result<Self> {
        let mut llm = LlmConfig::default();

        if let Some(proxy) = env_var("HTTPS_PROXY") {
            llm.https_proxy = Some(Url::parse(&proxy).map_err(|e| anyhow::anyhow!("invalid HTTPS_PROXY: {e}"))?);
        }
        llm.cloud_region = env_var("NEXT_PUBLIC_LANGFUSE_CLOUD_REGION");

        let mut power_rag = PowerRagConfig::default();
        if let Some(protocol) = env_var("LANGFUSE_POWERRAG_PROTOCOL") {
            power_rag.protocol = protocol;
        }
        if let Some(host) = env_var("LANGFUSE_POWERRAG_HOST") {
            power_rag.host = host;
        }
        if let Some(port) = env_var("LANGFUSE_POWERRAG_PORT") {
            power_rag.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid LANGFUSE_POWERRAG_PORT '{port}': {e}"))?;
        }
        llm.power_rag = power_rag;

        let ingestion = IngestionConfig {
            base_url: env_var("LANGFUSE_HOST")
                .map(|host| Url::parse(&host).map_err(|e| anyhow::anyhow!("invalid LANGFUSE_HOST: {e}")))
                .transpose()?,
            public_key: env_var("LANGFUSE_PUBLIC_KEY"),
            secret_key: env_var("LANGFUSE_SECRET_KEY").map(SecretString::from),
            default_project_id: env_var("LANGFUSE_PROJECT_ID"),
        };

        let config = Self {
            llm,
            ingestion,
            telemetry: None,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_llm_config()?;
        self.validate_ingestion_config()?;
        self.validate_telemetry_config()?;
        Ok(())
    }

    /// Validate vendor transport settings
    fn validate_llm_config(&self) -> anyhow::Result<()> {
        if self.llm.timeout()?.is_zero() {
            anyhow::bail!("llm.request_timeout must be greater than zero");
        }

        if let Some(ref proxy) = self.llm.https_proxy
            && !matches!(proxy.scheme(), "http" | "https")
        {
            anyhow::bail!("llm.https_proxy must use http or https, got '{}'", proxy.scheme());
        }

        let power_rag = &self.llm.power_rag;
        if power_rag.host.trim().is_empty() {
            anyhow::bail!("llm.power_rag.host must not be empty");
        }
        if power_rag.port == 0 {
            anyhow::bail!("llm.power_rag.port must be greater than 0");
        }
        if !matches!(power_rag.protocol.as_str(), "http" | "https") {
            anyhow::bail!("llm.power_rag.protocol must be http or https");
        }

        Ok(())
    }

    /// Ingestion keys come as a pair and need somewhere to go
    fn validate_ingestion_config(&self) -> anyhow::Result<()> {
        let ingestion = &self.ingestion;
        let has_public = ingestion.public_key.as_deref().is_some_and(|k| !k.is_empty());
        let has_secret = ingestion
            .secret_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().is_empty());

        if has_public != has_secret {
            anyhow::bail!("ingestion.public_key and ingestion.secret_key must be set together");
        }

        if ingestion.base_url.is_some() && !has_public {
            anyhow::bail!("ingestion.base_url requires public_key and secret_key");
        }

        Ok(())
    }

    /// Sampling rate must be a probability
    fn validate_telemetry_config(&self) -> anyhow::Result<()> {
        if let Some(tracing) = self.telemetry.as_ref().and_then(|t| t.tracing.as_ref())
            && !(0.0..=1.0).contains(&tracing.sampling_rate)
        {
            anyhow::bail!("telemetry.tracing.sampling_rate must be between 0.0 and 1.0");
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}
