use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Destination for traced events
///
/// With no `base_url` the events are only logged.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    /// Langfuse instance receiving the events
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Public key for basic auth
    #[serde(default)]
    pub public_key: Option<String>,
    /// Secret key for basic auth
    #[serde(default)]
    pub secret_key: Option<SecretString>,
    /// Project used for manual traces when the caller supplies none
    #[serde(default)]
    pub default_project_id: Option<String>,
}
