use serde_json::{Value, json};
use time::OffsetDateTime;

use nextrouter_protocol::finish::openai_to_claude;

use crate::util::{parse_tool_arguments, str_field, u64_field};

/// Map an OpenAI chat completion to a Claude messages response
/// (`resp_map openai_to_anthropic_messages`).
pub fn map_response(body: &Value) -> Value {
    let choice = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .cloned()
        .unwrap_or(json!({}));
    let message = choice.get("message").cloned().unwrap_or(json!({}));

    let mut content = Vec::new();
    if let Some(text) = str_field(&message, "content")
        && !text.is_empty()
    {
        content.push(json!({ "type": "text", "text": text }));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or(json!({}));
            content.push(json!({
                "type": "tool_use",
                "id": call.get("id").cloned().unwrap_or_default(),
                "name": function.get("name").cloned().unwrap_or_default(),
                "input": parse_tool_arguments(
                    str_field(&function, "arguments").unwrap_or("{}"),
                ),
            }));
        }
    }

    let stop_reason = str_field(&choice, "finish_reason")
        .map(openai_to_claude)
        .unwrap_or("end_turn");

    let usage = body.get("usage").cloned().unwrap_or(json!({}));
    let input = usage
        .get("prompt_tokens")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| u64_field(&usage, "input_tokens"));
    let output = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| u64_field(&usage, "output_tokens"));

    json!({
        "id": claude_message_id(str_field(body, "id")),
        "type": "message",
        "role": "assistant",
        "model": body.get("model").cloned().unwrap_or_default(),
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": { "input_tokens": input, "output_tokens": output },
    })
}

fn claude_message_id(upstream: Option<&str>) -> String {
    match upstream {
        Some(id) if id.starts_with("msg_") => id.to_string(),
        _ => format!("msg_{}", OffsetDateTime::now_utc().unix_timestamp_nanos()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_text_completion() {
        let body = json!({
            "id": "chatcmpl_1",
            "model": "gpt-test",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hello"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6},
        });
        let out = map_response(&body);
        assert_eq!(out["type"], "message");
        assert!(out["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(out["content"][0]["text"], "hello");
        assert_eq!(out["stop_reason"], "end_turn");
        assert_eq!(out["usage"]["input_tokens"], 4);
        assert_eq!(out["usage"]["output_tokens"], 2);
    }

    #[test]
    fn tool_calls_become_tool_use() {
        let body = json!({
            "id": "chatcmpl_2",
            "model": "m",
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "function": {"name": "f", "arguments": "{\"q\":\"x\"}"}},
                ]},
                "finish_reason": "tool_calls",
            }],
        });
        let out = map_response(&body);
        assert_eq!(out["content"][0]["type"], "tool_use");
        assert_eq!(out["content"][0]["input"], json!({"q": "x"}));
        assert_eq!(out["stop_reason"], "tool_use");
    }
}
