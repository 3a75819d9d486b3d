//! Conversion between internal types and Anthropic wire format

use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicMessage, AnthropicRequest, AnthropicResponse,
    AnthropicResponseBlock, AnthropicStreamDelta, AnthropicStreamEvent, AnthropicTool, AnthropicToolChoice,
    AnthropicUsage,
};
use crate::types::{
    ChoiceMessage, CompletionRequest, CompletionResponse, FinishReason, Message, Role, StreamDelta, StreamEvent,
    ToolCall, ToolChoice, Usage,
};

/// Default max tokens when not specified (Anthropic requires this field)
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Outbound: internal types -> Anthropic wire format --

impl From<&CompletionRequest> for AnthropicRequest {
    fn from(req: &CompletionRequest) -> Self {
        let system_parts: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));

        let messages = req
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(internal_message_to_anthropic)
            .collect();

        let mut tools: Vec<AnthropicTool> = req
            .tools
            .iter()
            .flatten()
            .map(|t| AnthropicTool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect();

        let mut tool_choice = req.tool_choice.as_ref().map(internal_tool_choice_to_anthropic);

        // Structured output rides on a single forced tool call
        if let Some(output) = &req.structured_output {
            tools.push(AnthropicTool {
                name: output.name.clone(),
                description: Some("Respond with structured output matching the input schema".to_owned()),
                input_schema: output.schema.clone(),
            });
            tool_choice = Some(AnthropicToolChoice {
                choice_type: "tool".to_owned(),
                name: Some(output.name.clone()),
            });
        }

        Self {
            model: req.model.clone(),
            max_tokens: req.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: req.params.temperature,
            top_p: req.params.top_p,
            stream: req.stream.then_some(true),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice,
        }
    }
}

fn internal_message_to_anthropic(msg: &Message) -> AnthropicMessage {
    if msg.role == Role::Tool
        && let Some(tool_use_id) = &msg.tool_call_id
    {
        return AnthropicMessage {
            role: "user".to_owned(),
            content: AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: msg.content.clone(),
            }]),
        };
    }

    let role = if msg.role == Role::Assistant { "assistant" } else { "user" };

    if msg.has_tool_calls() {
        let mut blocks = Vec::new();
        if !msg.content.is_empty() {
            blocks.push(AnthropicContentBlock::Text {
                text: msg.content.clone(),
            });
        }
        for tc in msg.tool_calls.iter().flatten() {
            blocks.push(AnthropicContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input: tc.arguments_value(),
            });
        }

        return AnthropicMessage {
            role: role.to_owned(),
            content: AnthropicContent::Blocks(blocks),
        };
    }

    AnthropicMessage {
        role: role.to_owned(),
        content: AnthropicContent::Text(msg.content.clone()),
    }
}

fn internal_tool_choice_to_anthropic(choice: &ToolChoice) -> AnthropicToolChoice {
    match choice {
        ToolChoice::Auto => AnthropicToolChoice {
            choice_type: "auto".to_owned(),
            name: None,
        },
        ToolChoice::Function(name) => AnthropicToolChoice {
            choice_type: "tool".to_owned(),
            name: Some(name.clone()),
        },
    }
}

// -- Inbound: Anthropic wire format -> internal types --

impl From<AnthropicResponse> for CompletionResponse {
    fn from(resp: AnthropicResponse) -> Self {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for block in &resp.content {
            match block {
                AnthropicResponseBlock::Text { text } => text_content.push_str(text),
                AnthropicResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id.clone(), name.clone(), input.to_string()));
                }
                AnthropicResponseBlock::Other => {}
            }
        }

        let message = ChoiceMessage {
            content: (!text_content.is_empty() || tool_calls.is_empty()).then_some(text_content),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        };

        let mut response = Self::single(resp.id, resp.model, message, Some(resp.usage.into()));
        if let Some(choice) = response.choices.first_mut()
            && let Some(reason) = resp.stop_reason.as_deref().and_then(FinishReason::parse)
        {
            choice.finish_reason = Some(reason);
        }
        response
    }
}

impl From<AnthropicUsage> for Usage {
    fn from(usage: AnthropicUsage) -> Self {
        Self::new(usage.input_tokens, usage.output_tokens)
    }
}

// -- Stream conversion --

/// Tracks input tokens across `message_start` and `message_delta`
#[derive(Debug, Default)]
pub struct AnthropicStreamState {
    input_tokens: u32,
}

impl AnthropicStreamState {
    /// Create a new stream state tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert an Anthropic stream event to internal stream events
    pub fn convert_event(&mut self, event: &AnthropicStreamEvent) -> Vec<StreamEvent> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = &message.usage {
                    self.input_tokens = usage.input_tokens;
                }
                Vec::new()
            }
            AnthropicStreamEvent::ContentBlockDelta {
                delta: AnthropicStreamDelta::TextDelta { text },
                ..
            } => vec![StreamEvent::text(text.clone())],
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(reason) = delta.stop_reason.as_deref().and_then(FinishReason::parse) {
                    events.push(StreamEvent::Delta(StreamDelta {
                        index: 0,
                        content: None,
                        finish_reason: Some(reason),
                    }));
                }
                if let Some(usage) = usage {
                    let input = if usage.input_tokens == 0 {
                        self.input_tokens
                    } else {
                        usage.input_tokens
                    };
                    events.push(StreamEvent::Usage(Usage::new(input, usage.output_tokens)));
                }
                events
            }
            AnthropicStreamEvent::MessageStop => vec![StreamEvent::Done],
            AnthropicStreamEvent::ContentBlockDelta { .. } | AnthropicStreamEvent::Other => Vec::new(),
        }
    }
}
