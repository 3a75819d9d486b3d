//! Conversion between internal types and `OpenAI` wire format

use serde_json::json;

use crate::protocol::openai::{
    OpenAiFunction, OpenAiFunctionCall, OpenAiMessage, OpenAiRequest, OpenAiResponse, OpenAiStreamChunk, OpenAiTool,
    OpenAiToolCall, OpenAiUsage,
};
use crate::types::{
    Choice, ChoiceMessage, CompletionRequest, CompletionResponse, FinishReason, Message, Role, StreamDelta,
    StreamEvent, StructuredOutput, ToolCall, ToolChoice, Usage,
};

// -- Outbound: internal types -> OpenAI wire format --

impl From<&CompletionRequest> for OpenAiRequest {
    fn from(req: &CompletionRequest) -> Self {
        let tools = req.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| OpenAiTool {
                    tool_type: t.tool_type.clone(),
                    function: OpenAiFunction {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    },
                })
                .collect()
        });

        Self {
            model: req.model.clone(),
            messages: req.messages.iter().map(Into::into).collect(),
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            max_tokens: req.params.max_tokens,
            stream: req.stream.then_some(true),
            tools,
            tool_choice: req.tool_choice.as_ref().map(tool_choice_to_openai),
            response_format: req.structured_output.as_ref().map(json_schema_format),
        }
    }
}

impl From<&Message> for OpenAiMessage {
    fn from(msg: &Message) -> Self {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let tool_calls = msg.has_tool_calls().then(|| {
            msg.tool_calls
                .iter()
                .flatten()
                .map(|tc| OpenAiToolCall {
                    id: tc.id.clone(),
                    tool_type: "function".to_owned(),
                    function: OpenAiFunctionCall {
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    },
                })
                .collect()
        });

        // Assistant turns that only call tools carry no content
        let content = if msg.content.is_empty() && tool_calls.is_some() {
            None
        } else {
            Some(msg.content.clone())
        };

        Self {
            role: role.to_owned(),
            content,
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

fn tool_choice_to_openai(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Function(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

/// Strict `json_schema` response format, only understood by the canonical API
fn json_schema_format(output: &StructuredOutput) -> serde_json::Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": output.name,
            "schema": output.schema,
        },
    })
}

/// Downgrade a request to `json_object` mode for Azure and compatible APIs
///
/// Those APIs reject `json_schema`, so the schema travels as a system hint.
pub(crate) fn use_json_object_mode(wire: &mut OpenAiRequest, output: &StructuredOutput) {
    wire.response_format = Some(json!({"type": "json_object"}));
    wire.messages.insert(
        0,
        OpenAiMessage {
            role: "system".to_owned(),
            content: Some(format!(
                "Respond only with a JSON object that conforms to this JSON schema: {}",
                output.schema
            )),
            tool_calls: None,
            tool_call_id: None,
        },
    );
}

// -- Inbound: OpenAI wire format -> internal types --

impl From<OpenAiResponse> for CompletionResponse {
    fn from(resp: OpenAiResponse) -> Self {
        let choices = resp
            .choices
            .into_iter()
            .map(|choice| {
                let tool_calls = choice.message.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|tc| ToolCall::new(tc.id, tc.function.name, tc.function.arguments))
                        .collect()
                });

                Choice {
                    index: choice.index,
                    message: ChoiceMessage {
                        content: choice.message.content,
                        tool_calls,
                    },
                    finish_reason: choice.finish_reason.as_deref().and_then(FinishReason::parse),
                }
            })
            .collect();

        Self {
            id: resp.id,
            model: resp.model,
            choices,
            usage: resp.usage.map(Into::into),
        }
    }
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: if usage.total_tokens == 0 {
                usage.prompt_tokens + usage.completion_tokens
            } else {
                usage.total_tokens
            },
        }
    }
}

// -- Stream conversion --

/// Convert one SSE chunk into internal stream events
pub fn openai_chunk_to_events(chunk: OpenAiStreamChunk) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = chunk
        .choices
        .into_iter()
        .filter(|choice| choice.delta.content.is_some() || choice.finish_reason.is_some())
        .map(|choice| {
            StreamEvent::Delta(StreamDelta {
                index: choice.index,
                content: choice.delta.content,
                finish_reason: choice.finish_reason.as_deref().and_then(FinishReason::parse),
            })
        })
        .collect();

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage.into()));
    }

    events
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{FunctionDefinition, ToolDefinition};

    #[test]
    fn request_carries_schema_as_json_schema_format() {
        let mut req = CompletionRequest::new("gpt-4o", vec![Message::new(Role::User, "score this")]);
        req.structured_output = Some(StructuredOutput {
            name: "Score".to_owned(),
            schema: json!({"type": "object"}),
        });

        let wire = OpenAiRequest::from(&req);

        let format = wire.response_format.unwrap();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "Score");
        assert!(wire.stream.is_none());
    }

    #[test]
    fn json_object_mode_prepends_schema_hint() {
        let mut req = CompletionRequest::new("gpt-4o", vec![Message::new(Role::User, "score this")]);
        let output = StructuredOutput {
            name: "Score".to_owned(),
            schema: json!({"type": "object"}),
        };
        req.structured_output = Some(output.clone());

        let mut wire = OpenAiRequest::from(&req);
        use_json_object_mode(&mut wire, &output);

        assert_eq!(wire.response_format.unwrap()["type"], "json_object");
        assert_eq!(wire.messages[0].role, "system");
        assert!(wire.messages[0].content.as_deref().unwrap().contains("JSON schema"));
        assert_eq!(wire.messages.len(), 2);
    }

    #[test]
    fn tool_only_assistant_turn_has_no_content() {
        let mut msg = Message::new(Role::Assistant, "");
        msg.tool_calls = Some(vec![ToolCall::new("call_1", "lookup", r#"{"q":"x"}"#)]);

        let wire = OpenAiMessage::from(&msg);

        assert!(wire.content.is_none());
        assert_eq!(wire.tool_calls.unwrap()[0].function.name, "lookup");
    }

    #[test]
    fn tools_and_forced_choice_serialize() {
        let mut req = CompletionRequest::new("gpt-4o", vec![Message::new(Role::User, "hi")]);
        req.tools = Some(vec![ToolDefinition::function(FunctionDefinition {
            name: "lookup".to_owned(),
            description: None,
            parameters: Some(json!({"type": "object"})),
        })]);
        req.tool_choice = Some(ToolChoice::Function("lookup".to_owned()));

        let body = serde_json::to_value(OpenAiRequest::from(&req)).unwrap();

        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tool_choice"]["function"]["name"], "lookup");
    }

    #[test]
    fn response_with_tool_calls_converts() {
        let resp: OpenAiResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7}
        }))
        .unwrap();

        let resp = CompletionResponse::from(resp);

        assert_eq!(resp.tool_calls()[0].function.name, "lookup");
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(resp.usage, Some(Usage::new(3, 4)));
    }

    #[test]
    fn stream_chunk_yields_text_and_usage() {
        let chunk: OpenAiStreamChunk = serde_json::from_value(json!({
            "choices": [{"index": 0, "delta": {"content": "Hel"}, "finish_reason": null}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2}
        }))
        .unwrap();

        let events = openai_chunk_to_events(chunk);

        assert_eq!(events[0], StreamEvent::text("Hel"));
        assert_eq!(events[1], StreamEvent::Usage(Usage::new(1, 2)));
    }

    #[test]
    fn role_only_chunk_yields_nothing() {
        let chunk: OpenAiStreamChunk =
            serde_json::from_value(json!({"choices": [{"index": 0, "delta": {}}]})).unwrap();

        assert!(openai_chunk_to_events(chunk).is_empty());
    }
}
