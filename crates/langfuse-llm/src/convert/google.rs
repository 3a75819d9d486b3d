//! Conversion between internal types and Gemini wire format

use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::google::{
    GoogleCandidate, GoogleContent, GoogleFunctionCall, GoogleFunctionCallingConfig, GoogleFunctionDeclaration,
    GoogleFunctionResponse, GoogleGenerationConfig, GooglePart, GoogleRequest, GoogleResponse, GoogleTool,
    GoogleToolConfig, GoogleUsageMetadata,
};
use crate::types::{
    Choice, ChoiceMessage, CompletionRequest, CompletionResponse, FinishReason, Message, Role, StreamDelta,
    StreamEvent, ToolCall, ToolChoice, Usage,
};

// -- Outbound: internal types -> Google wire format --

impl From<&CompletionRequest> for GoogleRequest {
    fn from(req: &CompletionRequest) -> Self {
        let system_parts: Vec<GooglePart> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| GooglePart::Text(m.content.clone()))
            .collect();
        let system_instruction = (!system_parts.is_empty()).then(|| GoogleContent {
            role: None,
            parts: system_parts,
        });

        // Function responses are keyed by name, not by call id
        let call_names: HashMap<&str, &str> = req
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter().flatten())
            .map(|tc| (tc.id.as_str(), tc.function.name.as_str()))
            .collect();

        let contents = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| internal_message_to_google(m, &call_names))
            .collect();

        let mut generation_config = GoogleGenerationConfig {
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            max_output_tokens: req.params.max_tokens,
            ..GoogleGenerationConfig::default()
        };
        if let Some(output) = &req.structured_output {
            generation_config.response_mime_type = Some("application/json".to_owned());
            generation_config.response_schema = Some(strip_unsupported_schema_keys(&output.schema));
        }
        let has_config = generation_config.temperature.is_some()
            || generation_config.top_p.is_some()
            || generation_config.max_output_tokens.is_some()
            || generation_config.response_mime_type.is_some();

        let tools = req.tools.as_ref().filter(|t| !t.is_empty()).map(|tools| {
            vec![GoogleTool {
                function_declarations: tools
                    .iter()
                    .map(|t| GoogleFunctionDeclaration {
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.as_ref().map(strip_unsupported_schema_keys),
                    })
                    .collect(),
            }]
        });

        let tool_config = req.tool_choice.as_ref().map(|choice| GoogleToolConfig {
            function_calling_config: match choice {
                ToolChoice::Auto => GoogleFunctionCallingConfig {
                    mode: "AUTO".to_owned(),
                    allowed_function_names: None,
                },
                ToolChoice::Function(name) => GoogleFunctionCallingConfig {
                    mode: "ANY".to_owned(),
                    allowed_function_names: Some(vec![name.clone()]),
                },
            },
        });

        Self {
            contents,
            system_instruction,
            generation_config: has_config.then_some(generation_config),
            tools,
            tool_config,
        }
    }
}

fn internal_message_to_google(msg: &Message, call_names: &HashMap<&str, &str>) -> GoogleContent {
    if msg.role == Role::Tool {
        let call_id = msg.tool_call_id.as_deref().unwrap_or_default();
        let name = call_names.get(call_id).copied().unwrap_or(call_id);
        let response = serde_json::from_str::<Value>(&msg.content)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| serde_json::json!({"content": msg.content}));

        return GoogleContent {
            role: Some("user".to_owned()),
            parts: vec![GooglePart::FunctionResponse(GoogleFunctionResponse {
                name: name.to_owned(),
                response,
            })],
        };
    }

    let role = if msg.role == Role::Assistant { "model" } else { "user" };
    let mut parts = Vec::new();
    if !msg.content.is_empty() {
        parts.push(GooglePart::Text(msg.content.clone()));
    }
    for tc in msg.tool_calls.iter().flatten() {
        parts.push(GooglePart::FunctionCall(GoogleFunctionCall {
            name: tc.function.name.clone(),
            args: tc.arguments_value(),
        }));
    }
    if parts.is_empty() {
        parts.push(GooglePart::Text(String::new()));
    }

    GoogleContent {
        role: Some(role.to_owned()),
        parts,
    }
}

/// Remove JSON Schema keywords Gemini's OpenAPI subset rejects
pub fn strip_unsupported_schema_keys(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !matches!(key.as_str(), "$schema" | "additionalProperties"))
                .map(|(key, value)| (key.clone(), strip_unsupported_schema_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_unsupported_schema_keys).collect()),
        other => other.clone(),
    }
}

// -- Inbound: Google wire format -> internal types --

impl From<GoogleResponse> for CompletionResponse {
    fn from(resp: GoogleResponse) -> Self {
        let choices = resp
            .candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| google_candidate_to_choice(candidate, u32::try_from(i).unwrap_or_default()))
            .collect();

        Self {
            id: resp.response_id.unwrap_or_default(),
            model: resp.model_version.unwrap_or_default(),
            choices,
            usage: resp.usage_metadata.map(Into::into),
        }
    }
}

fn google_candidate_to_choice(candidate: &GoogleCandidate, default_index: u32) -> Choice {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in candidate.content.iter().flat_map(|c| &c.parts) {
        match part {
            GooglePart::Text(t) => text.push_str(t),
            GooglePart::FunctionCall(fc) => {
                let id = format!("call_{}_{}", fc.name, tool_calls.len());
                tool_calls.push(ToolCall::new(id, fc.name.clone(), fc.args.to_string()));
            }
            GooglePart::FunctionResponse(_) => {}
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        candidate.finish_reason.as_deref().and_then(FinishReason::parse)
    } else {
        Some(FinishReason::ToolCalls)
    };

    Choice {
        index: candidate.index.unwrap_or(default_index),
        message: ChoiceMessage {
            content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        },
        finish_reason,
    }
}

impl From<GoogleUsageMetadata> for Usage {
    fn from(usage: GoogleUsageMetadata) -> Self {
        Self {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count.max(usage.prompt_token_count + usage.candidates_token_count),
        }
    }
}

// -- Stream conversion --

/// Convert one streamed `generateContent` chunk into internal stream events
pub fn google_chunk_to_events(chunk: GoogleResponse) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    for candidate in &chunk.candidates {
        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| &c.parts)
            .filter_map(|part| match part {
                GooglePart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        let finish_reason = candidate.finish_reason.as_deref().and_then(FinishReason::parse);

        if !text.is_empty() || finish_reason.is_some() {
            events.push(StreamEvent::Delta(StreamDelta {
                index: candidate.index.unwrap_or_default(),
                content: (!text.is_empty()).then_some(text),
                finish_reason,
            }));
        }
    }

    if let Some(usage) = chunk.usage_metadata
        && chunk.candidates.iter().any(|c| c.finish_reason.is_some())
    {
        events.push(StreamEvent::Usage(usage.into()));
    }

    events
}
