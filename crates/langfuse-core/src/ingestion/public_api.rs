//! Ingestor backed by the Langfuse public ingestion endpoint

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use super::{AuthCheck, BatchResult, EventIngestor, IngestError, IngestOptions, IngestionEvent};

/// Sends batches to `POST {base}/api/public/ingestion` with basic auth
pub struct HttpIngestor {
    client: Client,
    endpoint: String,
    public_key: String,
    secret_key: SecretString,
}

#[derive(Serialize)]
struct IngestionRequest<'a> {
    batch: &'a [IngestionEvent],
    metadata: IngestionMetadata<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestionMetadata<'a> {
    project_id: &'a str,
    is_langfuse_internal: bool,
    sdk_name: &'static str,
    sdk_version: &'static str,
}

impl HttpIngestor {
    /// Create an ingestor for the Langfuse instance at `base_url`
    pub fn new(client: Client, base_url: &Url, public_key: impl Into<String>, secret_key: SecretString) -> Self {
        let base = base_url.as_str().trim_end_matches('/');
        Self {
            client,
            endpoint: format!("{base}/api/public/ingestion"),
            public_key: public_key.into(),
            secret_key,
        }
    }
}

impl std::fmt::Debug for HttpIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIngestor")
            .field("endpoint", &self.endpoint)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventIngestor for HttpIngestor {
    async fn process_event_batch(
        &self,
        events: Vec<IngestionEvent>,
        auth: &AuthCheck,
        options: IngestOptions,
    ) -> Result<BatchResult, IngestError> {
        if events.is_empty() {
            return Ok(BatchResult::default());
        }

        let request = IngestionRequest {
            batch: &events,
            metadata: IngestionMetadata {
                project_id: &auth.scope.project_id,
                is_langfuse_internal: options.is_langfuse_internal,
                sdk_name: env!("CARGO_PKG_NAME"),
                sdk_version: env!("CARGO_PKG_VERSION"),
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(self.secret_key.expose_secret()))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(endpoint = %self.endpoint, error = %e, "ingestion request failed");
                IngestError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(endpoint = %self.endpoint, status = %status, "ingestion endpoint rejected batch");
            return Err(IngestError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let result: BatchResult = response
            .json()
            .await
            .map_err(|e| IngestError::Decode(e.to_string()))?;

        tracing::debug!(
            accepted = result.successes.len(),
            rejected = result.errors.len(),
            "ingestion batch submitted"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::EventType;

    fn event(id: &str) -> IngestionEvent {
        IngestionEvent {
            id: id.to_owned(),
            event_type: EventType::TraceCreate,
            timestamp: "2024-05-01T12:00:00.000Z".to_owned(),
            metadata: None,
            body: json!({"id": "trace-1", "name": "test"}),
        }
    }

    fn ingestor(server: &MockServer) -> HttpIngestor {
        let base = Url::parse(&server.uri()).unwrap();
        HttpIngestor::new(Client::new(), &base, "pk-lf-test", SecretString::from("sk-lf-test"))
    }

    #[tokio::test]
    async fn multi_status_body_maps_to_batch_result() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(207).set_body_json(json!({
                "successes": [{"id": "e1", "status": 201}],
                "errors": [{"id": "e2", "status": 400, "message": "invalid body"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = ingestor(&server)
            .process_event_batch(
                vec![event("e1"), event("e2")],
                &AuthCheck::project("p"),
                IngestOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.successes.len(), 1);
        assert_eq!(result.first_error().unwrap().message.as_deref(), Some("invalid body"));
    }

    #[tokio::test]
    async fn unauthorized_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/public/ingestion"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = ingestor(&server)
            .process_event_batch(vec![event("e1")], &AuthCheck::project("p"), IngestOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Rejected { status: 401, ref body } if body == "bad key"));
    }

    #[tokio::test]
    async fn empty_batch_skips_request() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let result = ingestor(&server)
            .process_event_batch(Vec::new(), &AuthCheck::project("p"), IngestOptions::default())
            .await
            .unwrap();

        assert_eq!(result, BatchResult::default());
    }

    #[test]
    fn debug_output_hides_secret() {
        let base = Url::parse("https://cloud.langfuse.com").unwrap();
        let ingestor = HttpIngestor::new(Client::new(), &base, "pk", SecretString::from("sk-very-secret"));
        let debug = format!("{ingestor:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("https://cloud.langfuse.com/api/public/ingestion"));
    }
}
