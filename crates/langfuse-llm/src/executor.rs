//! Drives one vendor call in the mode the caller asked for

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;

use crate::completion::{ByteStream, Completion};
use crate::error::LlmError;
use crate::observe::{CompletionCallback, RunInfo, notify_end, notify_error, notify_start};
use crate::provider::{EventStream, Provider};
use crate::structured::{add_json_keyword, extract_structured, needs_json_keyword, parse_tool_calls, structured_output};
use crate::types::{
    CompletionParams, CompletionRequest, FunctionDefinition, LlmCompletionParams, Message, StreamEvent,
    StructuredOutput, ToolDefinition, Usage,
};

/// Response shape selected by the call parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Schema-constrained JSON
    Structured,
    /// Tool selection
    ToolCall,
    /// Lazily drained bytes
    Stream,
    /// Full text
    Text,
}

impl Mode {
    /// Pick the mode: schema, then tools, then streaming, then text
    pub fn select(params: &LlmCompletionParams) -> Self {
        if params.structured_output_schema.is_some() {
            Self::Structured
        } else if !params.tools.is_empty() {
            Self::ToolCall
        } else if params.streaming {
            Self::Stream
        } else {
            Self::Text
        }
    }
}

/// Everything the executor needs for one call
pub struct Execution<'a> {
    /// Vendor client
    pub provider: &'a dyn Provider,
    /// Caller parameters
    pub params: &'a LlmCompletionParams,
    /// Normalized conversation
    pub messages: Vec<Message>,
    /// Caller callbacks followed by the trace handler, if any
    pub callbacks: Vec<Arc<dyn CompletionCallback>>,
    /// Run identity reported to callbacks
    pub run: RunInfo,
}

fn build_request(params: &LlmCompletionParams, messages: Vec<Message>) -> CompletionRequest {
    let model_params = &params.model_params;
    let mut request = CompletionRequest::new(&model_params.model, messages);
    request.params = CompletionParams {
        temperature: model_params.temperature,
        top_p: model_params.top_p,
        max_tokens: model_params.max_tokens,
    };
    request.provider_options.clone_from(&model_params.provider_options);
    request
}

fn tool_declarations(tools: &[FunctionDefinition]) -> Vec<ToolDefinition> {
    tools.iter().cloned().map(ToolDefinition::function).collect()
}

/// Run the call and shape its result
///
/// Callbacks see the start of the call, then its end or failure. For
/// streams the end is reported once the caller drains the stream.
///
/// # Errors
///
/// Returns the vendor error, or a validation error if a structured or
/// tool-call result does not have the expected shape
pub async fn execute(execution: Execution<'_>) -> Result<Completion, LlmError> {
    let Execution {
        provider,
        params,
        messages,
        callbacks,
        run,
    } = execution;
    let model_params = &params.model_params;
    let mode = Mode::select(params);

    tracing::info!(
        model = %model_params.model,
        provider = %model_params.provider,
        adapter = %model_params.adapter,
        base_url = ?params.base_url,
        mode = ?mode,
        tools = params.tools.len(),
        streaming = params.streaming,
        messages = messages.len(),
        "starting completion"
    );

    let mut request = build_request(params, messages);
    let structured = params.structured_output_schema.as_ref().map(structured_output);
    let qwen = needs_json_keyword(&model_params.model, &model_params.provider);

    match mode {
        Mode::Structured => {
            if let Some(schema) = &params.structured_output_schema
                && qwen
            {
                tracing::info!(model = %model_params.model, provider = %model_params.provider, "adding JSON keyword to user messages");
                request.messages = add_json_keyword(std::mem::take(&mut request.messages), schema);
            }
            request.structured_output.clone_from(&structured);
        }
        Mode::ToolCall => request.tools = Some(tool_declarations(&params.tools)),
        Mode::Stream => request.stream = true,
        Mode::Text => {}
    }

    let input = serde_json::to_value(&request.messages).unwrap_or(Value::Null);
    notify_start(&callbacks, &run, &input).await;

    let outcome = match mode {
        Mode::Stream => match provider.complete_stream(&request).await {
            Ok(events) => {
                tracing::info!(model = %model_params.model, "completion stream opened");
                return Ok(Completion::Stream(byte_stream(events, callbacks, run)));
            }
            Err(e) => Err(e),
        },
        _ => complete(provider, &request, mode, structured.as_ref(), qwen).await,
    };

    match outcome {
        Ok((completion, output, usage)) => {
            notify_end(&callbacks, &run, &output, usage).await;
            tracing::info!(
                model = %model_params.model,
                mode = ?mode,
                prompt_tokens = usage.map(|u| u.prompt_tokens),
                completion_tokens = usage.map(|u| u.completion_tokens),
                "completion succeeded"
            );
            Ok(completion)
        }
        Err(error) => {
            notify_error(&callbacks, &run, &error).await;
            Err(error)
        }
    }
}

async fn complete(
    provider: &dyn Provider,
    request: &CompletionRequest,
    mode: Mode,
    structured: Option<&StructuredOutput>,
    qwen_fields: bool,
) -> Result<(Completion, Value, Option<Usage>), LlmError> {
    let response = provider.complete(request).await?;
    let usage = response.usage;

    let (completion, output) = match (mode, structured) {
        (Mode::Structured, Some(output)) => {
            let value = extract_structured(&response, output, qwen_fields)?;
            (Completion::Structured(value.clone()), value)
        }
        (Mode::ToolCall, _) => {
            let parsed = parse_tool_calls(&response)?;
            let output = serde_json::to_value(&parsed).unwrap_or(Value::Null);
            (Completion::ToolCall(parsed), output)
        }
        _ => {
            let text = response.text();
            (Completion::Text(text.clone()), Value::String(text))
        }
    };

    Ok((completion, output, usage))
}

struct StreamState {
    events: EventStream,
    callbacks: Vec<Arc<dyn CompletionCallback>>,
    run: RunInfo,
    text: String,
    usage: Option<Usage>,
    done: bool,
}

/// Turn vendor events into text bytes, reporting the end to callbacks
fn byte_stream(events: EventStream, callbacks: Vec<Arc<dyn CompletionCallback>>, run: RunInfo) -> ByteStream {
    let state = StreamState {
        events,
        callbacks,
        run,
        text: String::new(),
        usage: None,
        done: false,
    };

    let stream = stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            match state.events.next().await {
                Some(Ok(StreamEvent::Delta(delta))) => {
                    if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                        state.text.push_str(&content);
                        return Some((Ok(Bytes::from(content)), state));
                    }
                }
                Some(Ok(StreamEvent::Usage(usage))) => state.usage = Some(usage),
                Some(Ok(StreamEvent::Done)) => {}
                Some(Err(error)) => {
                    tracing::error!(model = %state.run.model, error = %error, "completion stream failed");
                    notify_error(&state.callbacks, &state.run, &error).await;
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => {
                    let output = Value::String(std::mem::take(&mut state.text));
                    notify_end(&state.callbacks, &state.run, &output, state.usage).await;
                    tracing::debug!(model = %state.run.model, "completion stream drained");
                    return None;
                }
            }
        }
    });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::TryStreamExt;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::provider::ProviderCapabilities;
    use crate::types::{ChatMessage, ChoiceMessage, CompletionResponse, LlmAdapter, ModelParams, ToolCall};

    struct Scripted {
        response: Result<CompletionResponse, u16>,
        chunks: Vec<&'static str>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn text(text: &str) -> Self {
            Self::with(ChoiceMessage {
                content: Some(text.to_owned()),
                tool_calls: None,
            })
        }

        fn with(message: ChoiceMessage) -> Self {
            Self {
                response: Ok(CompletionResponse::single("r1", "m", message, Some(Usage::new(5, 2)))),
                chunks: vec![],
                seen: Mutex::new(vec![]),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                response: Err(status),
                chunks: vec![],
                seen: Mutex::new(vec![]),
            }
        }

        fn last_request(&self) -> CompletionRequest {
            self.seen.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                streaming: true,
                tool_calling: true,
            }
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            match &self.response {
                Ok(response) => Ok(response.clone()),
                Err(status) => Err(LlmError::Upstream {
                    status: Some(*status),
                    message: "boom".to_owned(),
                }),
            }
        }

        async fn complete_stream(&self, request: &CompletionRequest) -> Result<EventStream, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            let events: Vec<Result<StreamEvent, LlmError>> = self
                .chunks
                .iter()
                .map(|c| Ok(StreamEvent::text(*c)))
                .chain([Ok(StreamEvent::Usage(Usage::new(3, 2))), Ok(StreamEvent::Done)])
                .collect();
            Ok(Box::pin(stream::iter(events)))
        }
    }

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    #[async_trait]
    impl CompletionCallback for Log {
        async fn on_llm_start(&self, _run: &RunInfo, _input: &Value) -> anyhow::Result<()> {
            self.0.lock().unwrap().push("start".to_owned());
            Ok(())
        }

        async fn on_llm_end(&self, _run: &RunInfo, output: &Value, usage: Option<Usage>) -> anyhow::Result<()> {
            self.0
                .lock()
                .unwrap()
                .push(format!("end:{output}:{}", usage.map_or(0, |u| u.total_tokens)));
            Ok(())
        }

        async fn on_llm_error(&self, _run: &RunInfo, _error: &LlmError) -> anyhow::Result<()> {
            self.0.lock().unwrap().push("error".to_owned());
            Ok(())
        }
    }

    fn params(model: &str, provider: &str) -> LlmCompletionParams {
        LlmCompletionParams::new(
            vec![ChatMessage::user("rate this")],
            ModelParams::new(LlmAdapter::OpenAi, provider, model),
            SecretString::from("key"),
        )
    }

    fn run() -> RunInfo {
        RunInfo {
            run_id: "run-1".to_owned(),
            run_name: None,
            model: "gpt-4o".to_owned(),
            provider: "openai".to_owned(),
            adapter: LlmAdapter::OpenAi,
            model_parameters: json!({}),
            streaming: false,
        }
    }

    async fn run_with(
        provider: &Scripted,
        params: &LlmCompletionParams,
        log: &Arc<Log>,
    ) -> Result<Completion, LlmError> {
        let callbacks: Vec<Arc<dyn CompletionCallback>> = vec![log.clone()];
        execute(Execution {
            provider,
            params,
            messages: crate::normalize::normalize(&params.messages, params.model_params.adapter),
            callbacks,
            run: run(),
        })
        .await
    }

    fn score_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"reasoning": {"type": "string"}, "score": {"type": "number"}},
            "required": ["reasoning", "score"]
        })
    }

    #[test]
    fn mode_priority() {
        let mut p = params("gpt-4o", "openai");
        assert_eq!(Mode::select(&p), Mode::Text);
        p.streaming = true;
        assert_eq!(Mode::select(&p), Mode::Stream);
        p.tools = vec![FunctionDefinition {
            name: "lookup".to_owned(),
            description: None,
            parameters: None,
        }];
        assert_eq!(Mode::select(&p), Mode::ToolCall);
        p.structured_output_schema = Some(score_schema());
        assert_eq!(Mode::select(&p), Mode::Structured);
    }

    #[tokio::test]
    async fn text_mode_returns_full_text() {
        let provider = Scripted::text("hello");
        let log = Arc::new(Log::default());

        let completion = run_with(&provider, &params("gpt-4o", "openai"), &log).await.unwrap();

        assert_eq!(completion.as_text(), Some("hello"));
        assert_eq!(*log.0.lock().unwrap(), vec!["start", "end:\"hello\":7"]);
    }

    #[tokio::test]
    async fn structured_mode_validates_against_schema() {
        let provider = Scripted::text(r#"{"reasoning":"clear","score":0.9}"#);
        let mut p = params("gpt-4o", "openai");
        p.structured_output_schema = Some(score_schema());
        let log = Arc::new(Log::default());

        let completion = run_with(&provider, &p, &log).await.unwrap();

        let Completion::Structured(value) = completion else {
            panic!("expected structured output");
        };
        assert_eq!(value, json!({"reasoning": "clear", "score": 0.9}));
        assert!(provider.last_request().structured_output.is_some());
        assert_eq!(provider.last_request().messages[0].content, "rate this");
    }

    #[tokio::test]
    async fn structured_mode_rejects_schema_violations() {
        let provider = Scripted::text(r#"{"score":"high"}"#);
        let mut p = params("gpt-4o", "openai");
        p.structured_output_schema = Some(score_schema());
        let log = Arc::new(Log::default());

        let err = run_with(&provider, &p, &log).await.unwrap_err();

        assert!(matches!(err, LlmError::SchemaMismatch(_)));
        assert_eq!(*log.0.lock().unwrap(), vec!["start", "error"]);
    }

    #[tokio::test]
    async fn qwen_models_get_json_keyword() {
        let provider = Scripted::text(r#"{"reasoning":"ok","score":1}"#);
        let mut p = params("qwen-max", "qianwen");
        p.structured_output_schema = Some(score_schema());
        let log = Arc::new(Log::default());

        run_with(&provider, &p, &log).await.unwrap();

        let content = &provider.last_request().messages[0].content;
        assert!(content.starts_with("Please respond with a JSON object containing exactly two fields"));
    }

    #[tokio::test]
    async fn tool_mode_binds_tools_and_parses_calls() {
        let provider = Scripted::with(ChoiceMessage {
            content: None,
            tool_calls: Some(vec![ToolCall::new("call_1", "lookup", r#"{"q":"rust"}"#)]),
        });
        let mut p = params("gpt-4o", "openai");
        p.tools = vec![FunctionDefinition {
            name: "lookup".to_owned(),
            description: Some("search".to_owned()),
            parameters: Some(json!({"type": "object"})),
        }];
        let log = Arc::new(Log::default());

        let completion = run_with(&provider, &p, &log).await.unwrap();

        let Completion::ToolCall(response) = completion else {
            panic!("expected tool calls");
        };
        assert_eq!(response.tool_calls[0].args["q"], "rust");
        let tools = provider.last_request().tools.unwrap();
        assert_eq!(tools[0].tool_type, "function");
        assert_eq!(tools[0].function.name, "lookup");
    }

    #[tokio::test]
    async fn tool_mode_rejects_malformed_calls() {
        let provider = Scripted::with(ChoiceMessage {
            content: None,
            tool_calls: Some(vec![ToolCall::new("call_1", "lookup", "\"not an object\"")]),
        });
        let mut p = params("gpt-4o", "openai");
        p.tools = vec![FunctionDefinition {
            name: "lookup".to_owned(),
            description: None,
            parameters: None,
        }];
        let log = Arc::new(Log::default());

        let err = run_with(&provider, &p, &log).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse LLM tool call result");
    }

    #[tokio::test]
    async fn stream_mode_reports_end_after_drain() {
        let mut provider = Scripted::text("unused");
        provider.chunks = vec!["Hel", "lo"];
        let mut p = params("gpt-4o", "openai");
        p.streaming = true;
        let log = Arc::new(Log::default());

        let completion = run_with(&provider, &p, &log).await.unwrap();
        assert_eq!(*log.0.lock().unwrap(), vec!["start"]);

        let Completion::Stream(stream) = completion else {
            panic!("expected a stream");
        };
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();

        assert_eq!(chunks.concat(), b"Hello");
        assert_eq!(*log.0.lock().unwrap(), vec!["start", "end:\"Hello\":5"]);
        assert!(provider.last_request().stream);
    }

    #[tokio::test]
    async fn vendor_errors_reach_callbacks() {
        let provider = Scripted::failing(500);
        let log = Arc::new(Log::default());

        let err = run_with(&provider, &params("gpt-4o", "openai"), &log).await.unwrap_err();

        assert!(matches!(err, LlmError::Upstream { status: Some(500), .. }));
        assert_eq!(*log.0.lock().unwrap(), vec!["start", "error"]);
    }
}
