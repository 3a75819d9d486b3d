//! Mock LLM backend server for integration tests
//!
//! Implements a minimal OpenAI-compatible API that returns canned responses

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Mock LLM backend that returns predictable responses
pub struct MockLlm {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockLlmState>,
}

struct MockLlmState {
    completion_count: AtomicU32,
    /// Number of requests to fail before succeeding (0 = never fail)
    fail_count: AtomicU32,
    /// Status returned for failed requests
    fail_status: StatusCode,
    /// Custom response content (if set)
    response_content: Option<String>,
    last_request: Mutex<Option<serde_json::Value>>,
    last_headers: Mutex<HeaderMap>,
}

impl MockLlm {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_inner(0, StatusCode::INTERNAL_SERVER_ERROR, None).await
    }

    /// Start a mock server that fails the first `n` requests with 500
    pub async fn start_failing(n: u32) -> anyhow::Result<Self> {
        Self::start_inner(n, StatusCode::INTERNAL_SERVER_ERROR, None).await
    }

    /// Start a mock server that fails every request with `status`
    pub async fn start_rejecting(status: StatusCode) -> anyhow::Result<Self> {
        Self::start_inner(u32::MAX, status, None).await
    }

    /// Start a mock server with a custom response content
    pub async fn start_with_response(content: &str) -> anyhow::Result<Self> {
        Self::start_inner(0, StatusCode::INTERNAL_SERVER_ERROR, Some(content.to_owned())).await
    }

    async fn start_inner(
        fail_count: u32,
        fail_status: StatusCode,
        response_content: Option<String>,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(MockLlmState {
            completion_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(fail_count),
            fail_status,
            response_content,
            last_request: Mutex::new(None),
            last_headers: Mutex::new(HeaderMap::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat_completions))
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

    /// Base URL for configuring the mock as a provider
    ///
    /// Includes `/v1` since the OpenAI provider appends `/chat/completions`
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Number of completion requests received
    pub fn completion_count(&self) -> u32 {
        self.state.completion_count.load(Ordering::Relaxed)
    }

    /// Body of the most recent completion request
    pub fn last_request(&self) -> Option<serde_json::Value> {
        self.state.last_request.lock().unwrap().clone()
    }

    /// Value of `name` on the most recent completion request
    pub fn last_header(&self, name: &str) -> Option<String> {
        self.state
            .last_headers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
    }
}

impl Drop for MockLlm {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// -- Wire types matching OpenAI format --

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: String,
    created: u64,
    model: String,
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Serialize)]
struct Choice {
    index: u32,
    message: ResponseMessage,
    finish_reason: String,
}

#[derive(Debug, Serialize)]
struct ResponseMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallResponse>>,
}

#[derive(Debug, Serialize)]
struct ToolCallResponse {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: FunctionCallResponse,
}

#[derive(Debug, Serialize)]
struct FunctionCallResponse {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// -- Stream chunk types --

#[derive(Debug, Serialize)]
struct StreamChunk {
    id: String,
    object: String,
    created: u64,
    model: String,
    choices: Vec<StreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
}

#[derive(Debug, Serialize)]
struct StreamChoice {
    index: u32,
    delta: StreamDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct StreamDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

// -- Handlers --

async fn handle_chat_completions(
    State(state): State<Arc<MockLlmState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    state.completion_count.fetch_add(1, Ordering::Relaxed);
    *state.last_request.lock().unwrap() = Some(body.clone());
    *state.last_headers.lock().unwrap() = headers;

    // If fail_count > 0, decrement and return the failure status
    let remaining = state.fail_count.load(Ordering::Relaxed);
    if remaining > 0 {
        state.fail_count.fetch_sub(1, Ordering::Relaxed);
        return (
            state.fail_status,
            Json(serde_json::json!({
                "error": {
                    "message": "mock server intentional failure",
                    "type": "server_error"
                }
            })),
        )
            .into_response();
    }

    let Ok(req) = serde_json::from_value::<ChatCompletionRequest>(body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    if req.stream.unwrap_or(false) {
        return build_streaming_response(&state, &req).into_response();
    }

    let content = state
        .response_content
        .as_deref()
        .unwrap_or("Hello from mock LLM");

    // If tools were provided, simulate a tool call
    let (content, tool_calls, finish_reason) = if req.tools.is_some() {
        (
            String::new(),
            Some(vec![ToolCallResponse {
                id: "call_test_123".to_owned(),
                tool_type: "function".to_owned(),
                function: FunctionCallResponse {
                    name: "get_weather".to_owned(),
                    arguments: r#"{"location":"San Francisco"}"#.to_owned(),
                },
            }]),
            "tool_calls".to_owned(),
        )
    } else {
        (content.to_owned(), None, "stop".to_owned())
    };

    let response = ChatCompletionResponse {
        id: "chatcmpl-test-123".to_owned(),
        object: "chat.completion".to_owned(),
        created: 1_700_000_000,
        model: req.model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_owned(),
                content,
                tool_calls,
            },
            finish_reason,
        }],
        usage: Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
    };

    Json(response).into_response()
}

/// Build an SSE streaming response body, one content chunk per word
fn build_streaming_response(state: &MockLlmState, req: &ChatCompletionRequest) -> impl IntoResponse {
    let content = state
        .response_content
        .as_deref()
        .unwrap_or("Hello from mock LLM");
    let chunk = |delta: StreamDelta, finish_reason: Option<&str>, usage: Option<Usage>| StreamChunk {
        id: "chatcmpl-test-stream".to_owned(),
        object: "chat.completion.chunk".to_owned(),
        created: 1_700_000_000,
        model: req.model.clone(),
        choices: if usage.is_some() {
            vec![]
        } else {
            vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(ToOwned::to_owned),
            }]
        },
        usage,
    };
    let empty = || StreamDelta {
        role: None,
        content: None,
    };

    let mut chunks = vec![chunk(
        StreamDelta {
            role: Some("assistant".to_owned()),
            content: Some(String::new()),
        },
        None,
        None,
    )];
    for word in content.split_whitespace() {
        chunks.push(chunk(
            StreamDelta {
                role: None,
                content: Some(format!("{word} ")),
            },
            None,
            None,
        ));
    }
    chunks.push(chunk(empty(), Some("stop"), None));
    chunks.push(chunk(
        empty(),
        None,
        Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    ));

    let mut body = String::new();
    for chunk in &chunks {
        body.push_str(&format!("data: {}\n\n", serde_json::to_string(chunk).unwrap()));
    }
    body.push_str("data: [DONE]\n\n");

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
}
