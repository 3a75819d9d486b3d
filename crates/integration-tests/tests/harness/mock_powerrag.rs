//! Mock PowerRAG chat-messages server for integration tests

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use tokio_util::sync::CancellationToken;

/// How the mock answers
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"answer": ...}` body
    Answer(String),
    /// Server-sent events body, sent verbatim
    Events(String),
    /// Error status with a text body
    Failure(StatusCode, String),
}

/// A request received by the mock
#[derive(Debug, Clone)]
pub struct Received {
    pub body: serde_json::Value,
    pub authorization: Option<String>,
    pub headers: HeaderMap,
}

/// Mock PowerRAG service
pub struct MockPowerRag {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    reply: Reply,
    received: Mutex<Vec<Received>>,
}

impl MockPowerRag {
    /// Start a server that answers with `reply`
    pub async fn start(reply: Reply) -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            reply,
            received: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat-messages", routing::post(handle_chat_messages))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Full chat-messages endpoint
    pub fn endpoint(&self) -> String {
        format!("http://{}/v1/chat-messages", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Drop for MockPowerRag {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_chat_messages(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    state.received.lock().unwrap().push(Received {
        body,
        authorization,
        headers,
    });

    match &state.reply {
        Reply::Answer(answer) => Json(serde_json::json!({
            "event": "message",
            "answer": answer,
            "conversation_id": "conv-1",
        }))
        .into_response(),
        Reply::Events(events) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
            events.clone(),
        )
            .into_response(),
        Reply::Failure(status, body) => (*status, body.clone()).into_response(),
    }
}
