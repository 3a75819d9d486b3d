use serde::Deserialize;
use serde_json::Value;

/// Markers PowerRAG interleaves with answer fragments
const INTERNAL_MARKERS: [&str; 4] = [
    "<Thinking Begin>",
    "<Thinking End>",
    "<Action Begin>",
    "<Final Answer Begin>",
];

#[derive(Debug, Deserialize)]
struct SseData {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Extract the completion text from a PowerRAG response body
///
/// JSON bodies yield `answer`, then `content`, then the whole payload.
/// Anything else is read as server-sent events when `streaming` is set and
/// returned verbatim otherwise.
pub fn parse_response(text: &str, streaming: bool) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(payload) => answer_from_json(&payload),
        Err(e) if streaming => {
            tracing::debug!(error = %e, "PowerRAG response is not JSON, parsing as server-sent events");
            parse_sse(text)
        }
        Err(_) => text.to_owned(),
    }
}

fn non_empty<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn answer_from_json(payload: &Value) -> String {
    non_empty(payload, "answer")
        .or_else(|| non_empty(payload, "content"))
        .map_or_else(|| payload.to_string(), ToOwned::to_owned)
}

/// Accumulate `message` answers from an SSE body
///
/// The `message_end` answer is used only when no `message` event arrived.
pub fn parse_sse(text: &str) -> String {
    let mut content = String::new();
    let mut saw_message = false;
    let mut end_answer = String::new();

    for data in text.lines().filter_map(|line| line.strip_prefix("data: ")) {
        if data.trim().is_empty() {
            continue;
        }

        let parsed: SseData = match serde_json::from_str(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                let preview: String = data.chars().take(100).collect();
                tracing::debug!(line = %preview, error = %e, "skipping unparseable PowerRAG event");
                continue;
            }
        };

        match parsed.event.as_deref() {
            Some("message") => {
                saw_message = true;
                if let Some(answer) = parsed.answer
                    && !answer.trim().is_empty()
                    && !INTERNAL_MARKERS.iter().any(|m| answer.contains(m))
                {
                    content.push_str(&answer);
                }
            }
            Some("message_end") => {
                if let Some(answer) = parsed.answer.filter(|a| !a.is_empty()) {
                    end_answer = answer;
                }
                break;
            }
            _ => {
                if let Some(fragment) = parsed.content {
                    content.push_str(&fragment);
                }
            }
        }
    }

    if saw_message { content } else { end_answer }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_prefers_answer_then_content() {
        assert_eq!(parse_response(r#"{"answer":"a","content":"c"}"#, false), "a");
        assert_eq!(parse_response(r#"{"answer":"","content":"c"}"#, true), "c");
        assert_eq!(parse_response(r#"{"other":1}"#, false), r#"{"other":1}"#);
    }

    #[test]
    fn non_json_blocking_body_is_returned_verbatim() {
        assert_eq!(parse_response("plain answer", false), "plain answer");
    }

    #[test]
    fn message_events_win_over_message_end() {
        let body = [
            r#"data: {"event":"message","answer":"Hello "}"#,
            r#"data: {"event":"message","answer":"World"}"#,
            r#"data: {"event":"message_end","answer":"ignored"}"#,
        ]
        .join("\n");

        assert_eq!(parse_response(&body, true), "Hello World");
    }

    #[test]
    fn message_end_used_without_message_events() {
        let body = "data: {\"event\":\"workflow_started\"}\n\ndata: {\"event\":\"message_end\",\"answer\":\"final\"}\n";
        assert_eq!(parse_response(body, true), "final");
    }

    #[test]
    fn internal_markers_and_blank_fragments_are_filtered() {
        let body = [
            r#"data: {"event":"message","answer":"<Thinking Begin>plan"}"#,
            r#"data: {"event":"message","answer":"   "}"#,
            "data: not json",
            r#"data: {"event":"message","answer":"<Final Answer Begin>"}"#,
            r#"data: {"event":"message","answer":"42"}"#,
        ]
        .join("\n");

        assert_eq!(parse_response(&body, true), "42");
    }

    #[test]
    fn events_after_message_end_are_ignored() {
        let body = [
            r#"data: {"event":"message","answer":"a"}"#,
            r#"data: {"event":"message_end"}"#,
            r#"data: {"event":"message","answer":"b"}"#,
        ]
        .join("\n");

        assert_eq!(parse_sse(&body), "a");
    }
}
