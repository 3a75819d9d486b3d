mod harness;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use futures::TryStreamExt;
use harness::ingest::RecordingIngestor;
use harness::mock_llm::MockLlm;
use langfuse_llm::types::FunctionDefinition;
use langfuse_llm::{ChatMessage, Completion, LlmError};
use serde_json::json;

fn conversation() -> Vec<ChatMessage> {
    vec![ChatMessage::system("You are terse."), ChatMessage::user("Hello")]
}

#[tokio::test]
async fn text_completion_returns_content() {
    let mock = MockLlm::start().await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let result = service
        .fetch_llm_completion(harness::openai_params(&mock.base_url(), conversation()))
        .await
        .unwrap();

    assert_eq!(result.completion.as_text(), Some("Hello from mock LLM"));
    assert!(!result.traced_events.is_enabled());
    assert_eq!(mock.completion_count(), 1);

    let request = mock.last_request().unwrap();
    assert_eq!(request["model"], "mock-model-1");
    assert_eq!(request["messages"][0]["role"], "system");
    assert_eq!(request["messages"][1]["content"], "Hello");
}

#[tokio::test]
async fn credentials_and_extra_headers_are_forwarded() {
    let mock = MockLlm::start().await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.extra_headers = HashMap::from([("x-tenant".to_owned(), "acme".to_owned())]);
    service.fetch_llm_completion(params).await.unwrap();

    assert_eq!(mock.last_header("authorization").as_deref(), Some("Bearer sk-test"));
    assert_eq!(mock.last_header("x-tenant").as_deref(), Some("acme"));
}

#[tokio::test]
async fn empty_messages_are_not_sent() {
    let mock = MockLlm::start().await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let messages = vec![ChatMessage::system(""), ChatMessage::user("Hello")];
    service
        .fetch_llm_completion(harness::openai_params(&mock.base_url(), messages))
        .await
        .unwrap();

    let request = mock.last_request().unwrap();
    assert_eq!(request["messages"].as_array().unwrap().len(), 1);
    assert_eq!(request["messages"][0]["role"], "user");
}

#[tokio::test]
async fn vendor_failure_is_returned_when_throwing() {
    let mock = MockLlm::start_rejecting(StatusCode::UNAUTHORIZED).await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let err = service
        .fetch_llm_completion(harness::openai_params(&mock.base_url(), conversation()))
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::Upstream { status: Some(401), .. }), "got {err:?}");
}

#[tokio::test]
async fn vendor_failure_becomes_empty_text_when_not_throwing() {
    let mock = MockLlm::start_rejecting(StatusCode::INTERNAL_SERVER_ERROR).await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.throw_on_error = false;
    let result = service.fetch_llm_completion(params).await.unwrap();

    assert_eq!(result.completion.as_text(), Some(""));
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let mock = MockLlm::start_failing(1).await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.max_retries = Some(1);
    let result = service.fetch_llm_completion(params).await.unwrap();

    assert_eq!(result.completion.as_text(), Some("Hello from mock LLM"));
    assert_eq!(mock.completion_count(), 2);
}

#[tokio::test]
async fn persistent_overload_stops_after_retry_budget() {
    let mock = MockLlm::start_rejecting(StatusCode::SERVICE_UNAVAILABLE).await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.max_retries = Some(2);
    let err = service.fetch_llm_completion(params).await.unwrap_err();

    assert!(matches!(err, LlmError::Upstream { status: Some(503), .. }), "got {err:?}");
    assert_eq!(mock.completion_count(), 3);
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let mock = MockLlm::start_rejecting(StatusCode::UNAUTHORIZED).await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.max_retries = Some(3);
    service.fetch_llm_completion(params).await.unwrap_err();

    assert_eq!(mock.completion_count(), 1);
}

#[tokio::test]
async fn streaming_yields_text_chunks() {
    let mock = MockLlm::start().await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.streaming = true;
    let result = service.fetch_llm_completion(params).await.unwrap();

    let Completion::Stream(stream) = result.completion else {
        panic!("expected a stream, got {:?}", result.completion);
    };
    let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
    let text: String = chunks.iter().map(|c| String::from_utf8_lossy(c).into_owned()).collect();

    assert_eq!(text, "Hello from mock LLM ");
    assert_eq!(mock.last_request().unwrap()["stream"], true);
}

#[tokio::test]
async fn tools_yield_tool_calls() {
    let mock = MockLlm::start().await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), vec![ChatMessage::user("What is the weather?")]);
    params.tools = vec![FunctionDefinition {
        name: "get_weather".to_owned(),
        description: Some("Get current weather".to_owned()),
        parameters: Some(json!({
            "type": "object",
            "properties": {"location": {"type": "string"}}
        })),
    }];
    let result = service.fetch_llm_completion(params).await.unwrap();

    let Completion::ToolCall(response) = result.completion else {
        panic!("expected tool calls, got {:?}", result.completion);
    };
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].id, "call_test_123");
    assert_eq!(response.tool_calls[0].name, "get_weather");
    assert_eq!(response.tool_calls[0].args["location"], "San Francisco");

    let request = mock.last_request().unwrap();
    assert_eq!(request["tools"][0]["function"]["name"], "get_weather");
}

fn score_schema() -> serde_json::Value {
    json!({
        "title": "Score",
        "type": "object",
        "properties": {
            "score": {"type": "number"},
            "reasoning": {"type": "string"}
        },
        "required": ["score", "reasoning"]
    })
}

#[tokio::test]
async fn structured_output_is_validated() {
    let mock = MockLlm::start_with_response(r#"{"score": 0.9, "reasoning": "on topic"}"#)
        .await
        .unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.structured_output_schema = Some(score_schema());
    let result = service.fetch_llm_completion(params).await.unwrap();

    let Completion::Structured(value) = result.completion else {
        panic!("expected structured output, got {:?}", result.completion);
    };
    assert_eq!(value, json!({"score": 0.9, "reasoning": "on topic"}));

    let request = mock.last_request().unwrap();
    assert_eq!(request["response_format"]["type"], "json_object");
}

#[tokio::test]
async fn schema_violation_is_raised_even_when_not_throwing() {
    let mock = MockLlm::start_with_response(r#"{"score": "high"}"#).await.unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), conversation());
    params.structured_output_schema = Some(score_schema());
    params.throw_on_error = false;
    let err = service.fetch_llm_completion(params).await.unwrap_err();

    assert!(matches!(err, LlmError::SchemaMismatch(_)), "got {err:?}");
}

#[tokio::test]
async fn qwen_models_get_json_instruction_and_field_remapping() {
    let mock = MockLlm::start_with_response(r#"{"rating": 4, "reason": "clear"}"#)
        .await
        .unwrap();
    let service = harness::service(Arc::new(RecordingIngestor::new()));

    let mut params = harness::openai_params(&mock.base_url(), vec![ChatMessage::user("Rate this answer")]);
    params.model_params.model = "qwen-plus".to_owned();
    params.model_params.provider = "qianwen".to_owned();
    params.structured_output_schema = Some(score_schema());
    let result = service.fetch_llm_completion(params).await.unwrap();

    let Completion::Structured(value) = result.completion else {
        panic!("expected structured output, got {:?}", result.completion);
    };
    assert_eq!(value["score"], 4);
    assert_eq!(value["reasoning"], "clear");

    let request = mock.last_request().unwrap();
    let user = request["messages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["role"] == "user")
        .unwrap();
    let content = user["content"].as_str().unwrap();
    assert!(content.starts_with("Please respond with a JSON object"), "{content}");
    assert!(content.ends_with("Rate this answer"));
}
