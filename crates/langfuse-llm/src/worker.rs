//! Helpers used by background jobs (evaluations, experiments)

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use handlebars::Handlebars;
use http::StatusCode;
use langfuse_core::{HttpError, KeyDecryptor};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::completion::{Completion, LlmService};
use crate::error::LlmError;
use crate::observe::{TiktokenCounter, TokenCounter};
use crate::types::{ChatMessage, LlmAdapter, LlmCompletionParams, ModelParams, TraceParams};

/// Retry budget for worker calls
const WORKER_MAX_RETRIES: u32 = 1;

/// Error surfaced to job handlers
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Human-readable message
    pub message: String,
    /// HTTP status
    pub status: StatusCode,
}

/// Stored LLM connection, secrets still encrypted
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmApiKey {
    /// Vendor family
    pub adapter: LlmAdapter,
    /// Encrypted API key
    pub secret_key: String,
    /// Encrypted JSON object of extra headers
    #[serde(default)]
    pub extra_headers: Option<String>,
    /// Endpoint override
    #[serde(default, rename = "baseURL")]
    pub base_url: Option<String>,
    /// Adapter config blob
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
}

/// Sampling settings stored with a job
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate
    #[serde(default, rename = "max_tokens")]
    pub max_tokens: Option<u32>,
    /// Nucleus sampling threshold
    #[serde(default, rename = "top_p")]
    pub top_p: Option<f64>,
    /// Vendor-specific options
    #[serde(default)]
    pub provider_options: Map<String, Value>,
}

/// One job's LLM call
#[derive(Debug, Clone)]
pub struct LlmJob<'a> {
    /// Job execution id, for logs
    pub job_id: &'a str,
    /// Stored connection
    pub api_key: &'a LlmApiKey,
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Sampling settings
    pub model_config: &'a ModelConfig,
    /// Provider entry name
    pub provider: &'a str,
    /// Model name
    pub model: &'a str,
}

/// Run `operation`, mapping failures to [`ApiError`]
///
/// Quota and throttling failures become 429 errors named after the vendor
/// error. Anything else keeps its HTTP status.
///
/// # Errors
///
/// Returns the mapped error if `operation` fails
pub async fn with_llm_error_handling<T, F>(operation_name: &str, operation: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, LlmError>>,
{
    operation.await.map_err(|e| {
        if let Some(name) = e.vendor_error_name() {
            return ApiError {
                message: name.to_owned(),
                status: StatusCode::TOO_MANY_REQUESTS,
            };
        }
        ApiError {
            message: format!("Failed to {operation_name}: {e}"),
            status: e.status_code(),
        }
    })
}

/// Decrypt and parse a stored extra-headers blob
///
/// # Errors
///
/// Returns an error if decryption fails or the plaintext is not a JSON
/// object of strings
pub fn decrypt_extra_headers(
    decryptor: &dyn KeyDecryptor,
    encrypted: Option<&str>,
) -> Result<HashMap<String, String>, LlmError> {
    let Some(encrypted) = encrypted.filter(|e| !e.is_empty()) else {
        return Ok(HashMap::new());
    };

    let plaintext = decryptor
        .decrypt(encrypted)
        .map_err(|e| LlmError::InvalidCredentials(e.to_string()))?;
    serde_json::from_str(plaintext.expose_secret())
        .map_err(|_| LlmError::InvalidCredentials("extra headers must be a JSON object of strings".to_owned()))
}

/// Runs LLM calls on behalf of background jobs
pub struct LlmWorker {
    service: Arc<LlmService>,
    decryptor: Arc<dyn KeyDecryptor>,
    token_counter: Arc<dyn TokenCounter>,
}

impl LlmWorker {
    /// Create a worker counting tokens with tiktoken
    pub fn new(service: Arc<LlmService>, decryptor: Arc<dyn KeyDecryptor>) -> Self {
        Self {
            service,
            decryptor,
            token_counter: Arc::new(TiktokenCounter::default()),
        }
    }

    /// Replace the token counter used for traced calls
    #[must_use]
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = counter;
        self
    }

    fn params(&self, job: LlmJob<'_>) -> Result<LlmCompletionParams, LlmError> {
        let key = job.api_key;
        let secret: SecretString = self
            .decryptor
            .decrypt(&key.secret_key)
            .map_err(|e| LlmError::InvalidCredentials(e.to_string()))?;

        let model_params = ModelParams {
            adapter: key.adapter,
            provider: job.provider.to_owned(),
            model: job.model.to_owned(),
            temperature: job.model_config.temperature,
            max_tokens: job.model_config.max_tokens,
            top_p: job.model_config.top_p,
            provider_options: job.model_config.provider_options.clone(),
        };

        let mut params = LlmCompletionParams::new(job.messages, model_params, secret);
        params.extra_headers = decrypt_extra_headers(self.decryptor.as_ref(), key.extra_headers.as_deref())?;
        params.base_url = key.base_url.clone().filter(|u| !u.is_empty());
        params.config.clone_from(&key.config);
        params.max_retries = Some(WORKER_MAX_RETRIES);
        Ok(params)
    }

    /// Structured call validated against `schema`
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the call fails or the output does not
    /// match the schema
    pub async fn call_structured_llm(&self, job: LlmJob<'_>, schema: &Value) -> Result<Value, ApiError> {
        let job_id = job.job_id.to_owned();
        let (provider, model) = (job.provider.to_owned(), job.model.to_owned());
        let started = Instant::now();

        tracing::info!(
            job_id = %job_id,
            provider = %provider,
            model = %model,
            adapter = %job.api_key.adapter,
            messages = job.messages.len(),
            "starting structured LLM call"
        );

        let result = with_llm_error_handling("call LLM", async {
            let mut params = self.params(job)?;
            params.structured_output_schema = Some(schema.clone());

            match self.service.fetch_llm_completion(params).await?.completion {
                Completion::Structured(value) => Ok(value),
                other => Err(LlmError::SchemaMismatch(format!(
                    "expected structured output, got {other:?}"
                ))),
            }
        })
        .await;

        let duration_ms = started.elapsed().as_millis();
        match &result {
            Ok(_) => tracing::info!(job_id = %job_id, model = %model, duration_ms, "structured LLM call succeeded"),
            Err(e) => tracing::error!(
                job_id = %job_id,
                provider = %provider,
                model = %model,
                duration_ms,
                error = %e,
                "structured LLM call failed"
            ),
        }
        result
    }

    /// Plain-text call; vendor failures yield an empty string
    ///
    /// Traced events are flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] for validation failures
    pub async fn call_llm(&self, job: LlmJob<'_>, trace_params: Option<TraceParams>) -> Result<String, ApiError> {
        with_llm_error_handling("call LLM", async {
            let mut params = self.params(job)?;
            params.throw_on_error = false;
            params.trace_params = trace_params.map(|mut t| {
                t.token_counter = Some(Arc::clone(&self.token_counter));
                t
            });
            let traced = params.trace_params.is_some();

            let result = self.service.fetch_llm_completion(params).await?;
            if traced {
                result.traced_events.process().await;
            }

            match result.completion {
                Completion::Text(text) => Ok(text),
                other => Err(LlmError::Internal(anyhow::anyhow!("expected text completion, got {other:?}"))),
            }
        })
        .await
    }
}

impl std::fmt::Debug for LlmWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmWorker").field("service", &self.service).finish_non_exhaustive()
    }
}

/// Render a Handlebars template against `params` without HTML escaping
///
/// A template that fails to compile or render is returned unchanged.
pub fn compile_handlebar_string(template: &str, params: &Map<String, Value>) -> String {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars.render_template(template, params).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "handlebars compilation failed, using template verbatim");
        template.to_owned()
    })
}
