//! Conversion of caller messages into the canonical vendor message list

use serde_json::Value;

use crate::types::{ChatMessage, ChatMessageRole, ChatMessageType, LlmAdapter, Message, Role, ToolCall};

/// Placeholder used when content cannot be rendered as text
pub const UNSERIALIZABLE_CONTENT: &str = "[Unserializable content]";

/// Render message content as text
///
/// Strings are used verbatim and null is empty. Anything else is
/// serialized as JSON.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| UNSERIALIZABLE_CONTENT.to_owned()),
    }
}

/// Whether the adapter rejects conversations without a user turn
const fn requires_user_message(adapter: LlmAdapter) -> bool {
    matches!(adapter, LlmAdapter::VertexAi)
}

/// Normalize caller messages for `adapter`
///
/// A lone message sent to an adapter that needs a user turn becomes a
/// user message. Otherwise roles map one-to-one, and messages left with
/// empty content and no tool calls are dropped.
pub fn normalize(messages: &[ChatMessage], adapter: LlmAdapter) -> Vec<Message> {
    if requires_user_message(adapter)
        && let [only] = messages
    {
        return vec![Message::new(Role::User, content_text(&only.content))];
    }

    messages
        .iter()
        .map(normalize_one)
        .filter(|m| !m.content.is_empty() || m.has_tool_calls())
        .collect()
}

fn normalize_one(message: &ChatMessage) -> Message {
    let content = content_text(&message.content);

    match message.role {
        ChatMessageRole::User => Message::new(Role::User, content),
        ChatMessageRole::System | ChatMessageRole::Developer => Message::new(Role::System, content),
        _ if message.message_type == ChatMessageType::ToolResult => Message {
            role: Role::Tool,
            content,
            tool_calls: None,
            tool_call_id: message.tool_call_id.clone(),
        },
        _ => {
            let tool_calls = (message.message_type == ChatMessageType::AssistantToolCall)
                .then(|| message.tool_calls.as_deref())
                .flatten()
                .map(|calls| {
                    calls
                        .iter()
                        .map(|call| ToolCall::new(&call.id, &call.name, Value::Object(call.args.clone()).to_string()))
                        .collect()
                });

            Message {
                role: Role::Assistant,
                content,
                tool_calls,
                tool_call_id: None,
            }
        }
    }
}
