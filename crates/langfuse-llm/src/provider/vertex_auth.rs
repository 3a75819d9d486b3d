//! Service-account access tokens for Vertex AI
//!
//! Exchanges an RS256-signed JWT assertion for an OAuth access token and
//! caches it until shortly before expiry.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::LlmError;

/// Default Google OAuth token endpoint
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scope granting Vertex AI access
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Refresh this many seconds before the token expires
const EXPIRY_SAFETY_WINDOW_SECS: i64 = 300;

/// Assertion lifetime
const ASSERTION_TTL_SECS: i64 = 3600;

/// Fields of a service-account key file used for the JWT flow
#[derive(Deserialize)]
struct ServiceAccountKey {
    project_id: String,
    client_email: String,
    private_key: SecretString,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: SecretString,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

const fn default_expires_in() -> i64 {
    ASSERTION_TTL_SECS
}

struct CachedToken {
    token: SecretString,
    expires_at: i64,
}

/// Access-token source for one service account
pub struct VertexAuth {
    key: ServiceAccountKey,
    client: Client,
    cache: Mutex<Option<CachedToken>>,
}

impl VertexAuth {
    /// Parse a service-account key file
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidCredentials` if the JSON lacks the required fields.
    pub fn from_json(raw: &str, client: Client) -> Result<Self, LlmError> {
        let key: ServiceAccountKey = serde_json::from_str(raw)
            .map_err(|e| LlmError::InvalidCredentials(format!("invalid service account key: {e}")))?;

        Ok(Self {
            key,
            client,
            cache: Mutex::new(None),
        })
    }

    /// Project the service account belongs to
    pub fn project_id(&self) -> &str {
        &self.key.project_id
    }

    fn token_uri(&self) -> &str {
        self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    /// Return a valid access token, exchanging a new assertion when needed
    ///
    /// # Errors
    ///
    /// Returns `LlmError::InvalidCredentials` if the private key cannot sign,
    /// or `LlmError::Upstream` if the token endpoint rejects the assertion.
    pub async fn access_token(&self) -> Result<SecretString, LlmError> {
        // Holding the lock across the exchange keeps concurrent callers from refreshing twice
        let mut cache = self.cache.lock().await;
        let now = Utc::now().timestamp();

        if let Some(cached) = cache.as_ref()
            && cached.expires_at - EXPIRY_SAFETY_WINDOW_SECS > now
        {
            return Ok(cached.token.clone());
        }

        let token = self.exchange(now).await?;
        let access_token = token.access_token.clone();
        *cache = Some(CachedToken {
            token: token.access_token,
            expires_at: now + token.expires_in,
        });
        tracing::debug!(expires_in = token.expires_in, "refreshed Vertex AI access token");

        Ok(access_token)
    }

    async fn exchange(&self, now: i64) -> Result<TokenResponse, LlmError> {
        let claims = Claims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: self.token_uri(),
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };

        let key = EncodingKey::from_rsa_pem(self.key.private_key.expose_secret().as_bytes())
            .map_err(|e| LlmError::InvalidCredentials(format!("invalid service account private key: {e}")))?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| LlmError::InvalidCredentials(format!("failed to sign token assertion: {e}")))?;

        let form = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .client
            .post(self.token_uri())
            .form(&form)
            .send()
            .await
            .map_err(|e| LlmError::Upstream {
                status: None,
                message: format!("token endpoint request failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::upstream(status, body));
        }

        super::parse_json(response).await
    }
}
