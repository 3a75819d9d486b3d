//! Structured-output and tool-call result handling

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::types::{CompletionResponse, LlmToolCall, Message, Role, StructuredOutput, ToolCallResponse};

const DEFAULT_SCHEMA_NAME: &str = "StructuredOutput";

static INVALID_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_-]").expect("must be valid regex"));

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").expect("must be valid regex"));

/// Wrap a caller schema for the providers
///
/// The schema `title`, reduced to characters every vendor accepts in a
/// function or schema name, names the output.
pub fn structured_output(schema: &Value) -> StructuredOutput {
    let name = schema
        .get("title")
        .and_then(Value::as_str)
        .map(|title| INVALID_NAME_CHARS.replace_all(title, "_").into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_SCHEMA_NAME.to_owned());

    StructuredOutput {
        name,
        schema: schema.clone(),
    }
}

/// Whether the model only honours JSON mode when prompted with "json"
pub fn needs_json_keyword(model: &str, provider: &str) -> bool {
    let provider = provider.to_lowercase();
    model.to_lowercase().contains("qwen") && (provider.contains("qianwen") || provider.contains("qwen"))
}

fn count_word(n: usize) -> String {
    const WORDS: [&str; 11] = [
        "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    ];
    WORDS.get(n).map_or_else(|| n.to_string(), |w| (*w).to_owned())
}

fn field_type(property: &Value) -> String {
    match property.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect::<Vec<_>>().join("/"),
        _ => "any".to_owned(),
    }
}

/// Instruction listing the fields a schema requires
pub fn json_field_instruction(schema: &Value) -> String {
    let fields: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, property)| format!("\"{name}\" ({})", field_type(property)))
                .collect()
        })
        .unwrap_or_default();

    let listed = match fields.as_slice() {
        [] => return "Please respond with a JSON object. ".to_owned(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    };

    let noun = if fields.len() == 1 { "field" } else { "fields" };
    format!(
        "Please respond with a JSON object containing exactly {} {noun}: {listed}. ",
        count_word(fields.len())
    )
}

/// Prefix user turns lacking the word "json" with the field instruction
pub fn add_json_keyword(messages: Vec<Message>, schema: &Value) -> Vec<Message> {
    let instruction = json_field_instruction(schema);

    messages
        .into_iter()
        .map(|mut message| {
            if message.role == Role::User && !message.content.to_lowercase().contains("json") {
                message.content = format!("{instruction}{}", message.content);
            }
            message
        })
        .collect()
}

/// Check `value` against `schema`
///
/// # Errors
///
/// Returns [`LlmError::SchemaMismatch`] listing every violation, or if the
/// schema itself does not compile
pub fn validate(value: &Value, schema: &Value) -> Result<(), LlmError> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| LlmError::SchemaMismatch(format!("invalid JSON Schema: {e}")))?;

    let violations: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{e} at {}", e.instance_path))
        .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(LlmError::SchemaMismatch(violations.join("; ")))
    }
}

fn parse_json_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let body = CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());
    serde_json::from_str(body).ok()
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null | Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(_) => true,
    }
}

fn rename_field(object: &mut Map<String, Value>, from: &str, to: &str) {
    if is_truthy(object.get(from))
        && !is_truthy(object.get(to))
        && let Some(value) = object.remove(from)
    {
        tracing::info!(from, to, "remapping structured output field");
        object.insert(to.to_owned(), value);
    }
}

/// Rename the field spellings Qwen models use for `reasoning` and `score`
pub fn remap_qwen_fields(mut value: Value) -> Value {
    if let Value::Object(object) = &mut value {
        rename_field(object, "reason", "reasoning");
        rename_field(object, "rating", "score");
        rename_field(object, "explanation", "reasoning");
        rename_field(object, "value", "score");
    }
    value
}

/// Pull the structured answer out of a vendor response and validate it
///
/// Forced-tool vendors answer with a call to the output tool; JSON-mode
/// vendors answer with text, optionally fenced. With `qwen_fields` the
/// Qwen field spellings are remapped before validation.
///
/// # Errors
///
/// Returns [`LlmError::SchemaMismatch`] if no JSON object is found or it
/// violates the schema
pub fn extract_structured(
    response: &CompletionResponse,
    output: &StructuredOutput,
    qwen_fields: bool,
) -> Result<Value, LlmError> {
    let mut value = response
        .tool_calls()
        .iter()
        .find(|call| call.function.name == output.name)
        .and_then(|call| serde_json::from_str::<Value>(&call.function.arguments).ok())
        .or_else(|| parse_json_text(&response.text()))
        .ok_or_else(|| LlmError::SchemaMismatch("response did not contain a JSON value".to_owned()))?;

    if qwen_fields {
        value = remap_qwen_fields(value);
    }
    validate(&value, &output.schema)?;
    Ok(value)
}

/// Map the vendor's tool calls into a [`ToolCallResponse`]
///
/// # Errors
///
/// Returns [`LlmError::ToolCallParse`] if a call lacks an id or name, or its
/// arguments are not a JSON object
pub fn parse_tool_calls(response: &CompletionResponse) -> Result<ToolCallResponse, LlmError> {
    let tool_calls = response
        .tool_calls()
        .iter()
        .map(|call| {
            if call.id.is_empty() || call.function.name.is_empty() {
                return Err(LlmError::ToolCallParse);
            }
            let args = match serde_json::from_str::<Value>(&call.function.arguments) {
                Ok(Value::Object(args)) => args,
                Err(_) if call.function.arguments.trim().is_empty() => Map::new(),
                _ => return Err(LlmError::ToolCallParse),
            };
            Ok(LlmToolCall {
                id: call.id.clone(),
                name: call.function.name.clone(),
                args,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ToolCallResponse {
        content: response.text(),
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::{ChoiceMessage, ToolCall};

    fn schema() -> Value {
        json!({
            "title": "score result",
            "type": "object",
            "properties": {
                "reasoning": {"type": "string"},
                "score": {"type": "number"}
            },
            "required": ["reasoning", "score"]
        })
    }

    fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse::single(
            "r1",
            "m",
            ChoiceMessage {
                content: Some(text.to_owned()),
                tool_calls: None,
            },
            None,
        )
    }

    fn tool_response(calls: Vec<ToolCall>) -> CompletionResponse {
        CompletionResponse::single(
            "r1",
            "m",
            ChoiceMessage {
                content: None,
                tool_calls: Some(calls),
            },
            None,
        )
    }

    #[test]
    fn names_output_after_sanitized_title() {
        assert_eq!(structured_output(&schema()).name, "score_result");
        assert_eq!(structured_output(&json!({"type": "object"})).name, "StructuredOutput");
    }

    #[test]
    fn detects_qwen_family() {
        assert!(needs_json_keyword("qwen-max", "Qianwen"));
        assert!(needs_json_keyword("Qwen2.5-72B", "my-qwen-proxy"));
        assert!(!needs_json_keyword("qwen-max", "openai"));
        assert!(!needs_json_keyword("gpt-4o", "qwen"));
    }

    #[test]
    fn instruction_lists_schema_fields() {
        assert_eq!(
            json_field_instruction(&schema()),
            "Please respond with a JSON object containing exactly two fields: \"reasoning\" (string) and \"score\" (number). "
        );
    }

    #[test]
    fn keyword_added_only_where_missing() {
        let messages = vec![
            Message::new(Role::System, "grade"),
            Message::new(Role::User, "rate this"),
            Message::new(Role::User, "answer in JSON"),
        ];

        let processed = add_json_keyword(messages, &schema());

        assert_eq!(processed[0].content, "grade");
        assert!(processed[1].content.starts_with("Please respond with a JSON object"));
        assert!(processed[1].content.ends_with("rate this"));
        assert_eq!(processed[2].content, "answer in JSON");
    }

    #[test]
    fn extracts_json_text_including_fences() {
        let output = structured_output(&schema());
        let response = text_response("```json\n{\"reasoning\": \"ok\", \"score\": 0.5}\n```");

        let value = extract_structured(&response, &output, false).unwrap();
        assert_eq!(value, json!({"reasoning": "ok", "score": 0.5}));
    }

    #[test]
    fn extracts_forced_tool_arguments() {
        let output = structured_output(&schema());
        let response = tool_response(vec![ToolCall::new(
            "toolu_1",
            "score_result",
            r#"{"reasoning":"fine","score":1}"#,
        )]);

        let value = extract_structured(&response, &output, false).unwrap();
        assert_eq!(value["score"], 1);
    }

    #[test]
    fn schema_violations_fail() {
        let output = structured_output(&schema());
        let err = extract_structured(&text_response(r#"{"reasoning": "no score"}"#), &output, false).unwrap_err();
        assert!(matches!(err, LlmError::SchemaMismatch(_)));

        let err = extract_structured(&text_response("not json"), &output, false).unwrap_err();
        assert!(matches!(err, LlmError::SchemaMismatch(_)));
    }

    #[test]
    fn qwen_field_spellings_are_remapped() {
        let remapped = remap_qwen_fields(json!({"reason": "fine", "rating": 3, "extra": true}));
        assert_eq!(remapped, json!({"reasoning": "fine", "score": 3, "extra": true}));

        let kept = remap_qwen_fields(json!({"reasoning": "keep", "reason": "drop?", "value": 0}));
        assert_eq!(kept, json!({"reasoning": "keep", "reason": "drop?", "value": 0}));

        let output = structured_output(&schema());
        let value = extract_structured(&text_response(r#"{"explanation":"ok","value":2}"#), &output, true).unwrap();
        assert_eq!(value, json!({"reasoning": "ok", "score": 2}));
    }

    #[test]
    fn parses_well_formed_tool_calls() {
        let response = tool_response(vec![ToolCall::new("call_1", "lookup", r#"{"q":"rust"}"#)]);

        let parsed = parse_tool_calls(&response).unwrap();

        assert_eq!(parsed.content, "");
        assert_eq!(parsed.tool_calls[0].name, "lookup");
        assert_eq!(parsed.tool_calls[0].args["q"], "rust");
    }

    #[test]
    fn malformed_tool_calls_fail() {
        for call in [
            ToolCall::new("call_1", "lookup", "[1, 2]"),
            ToolCall::new("", "lookup", "{}"),
            ToolCall::new("call_1", "", "{}"),
            ToolCall::new("call_1", "lookup", "{broken"),
        ] {
            let err = parse_tool_calls(&tool_response(vec![call])).unwrap_err();
            assert_eq!(err.to_string(), "Failed to parse LLM tool call result");
        }
    }
}
