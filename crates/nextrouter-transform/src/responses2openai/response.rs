use serde_json::{Value, json};

use nextrouter_protocol::ids::{chat_completion_id, unix_timestamp};

use crate::util::{arr_field, openai_usage, str_field, u64_field};

/// Map an OpenAI Responses response to a chat completion
/// (`resp_map openai_responses_to_openai_chat`).
pub fn map_response(body: &Value) -> Value {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for item in arr_field(body, "output") {
        match str_field(item, "type") {
            Some("message") => {
                for part in arr_field(item, "content") {
                    match str_field(part, "type") {
                        Some("output_text") => {
                            text.push_str(str_field(part, "text").unwrap_or_default());
                        }
                        Some("refusal") => {
                            text.push_str(str_field(part, "refusal").unwrap_or_default());
                        }
                        _ => {}
                    }
                }
            }
            Some("function_call") => {
                tool_calls.push(json!({
                    "id": item
                        .get("call_id")
                        .or_else(|| item.get("id"))
                        .cloned()
                        .unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": item.get("name").cloned().unwrap_or_default(),
                        "arguments": item.get("arguments").cloned().unwrap_or(json!("{}")),
                    }
                }));
            }
            _ => {}
        }
    }

    if text.is_empty()
        && tool_calls.is_empty()
        && let Some(fallback) = str_field(body, "output_text")
    {
        text.push_str(fallback);
    }

    // Multiple tool calls with no text map to `tool_calls`.
    let finish_reason = if !tool_calls.is_empty() && text.is_empty() {
        "tool_calls"
    } else {
        match body
            .get("incomplete_details")
            .and_then(|d| str_field(d, "reason"))
        {
            Some("max_output_tokens") => "length",
            Some("content_filter") => "content_filter",
            _ => "stop",
        }
    };

    let mut message = json!({ "role": "assistant" });
    let message_obj = message.as_object_mut().expect("object literal");
    message_obj.insert(
        "content".to_string(),
        if text.is_empty() {
            Value::Null
        } else {
            Value::String(text)
        },
    );
    if !tool_calls.is_empty() {
        message_obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }

    let usage = body.get("usage").cloned().unwrap_or(json!({}));
    let input = u64_field(&usage, "input_tokens");
    let output = u64_field(&usage, "output_tokens");
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(input + output);
    let cached = usage
        .get("input_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(Value::as_u64);

    json!({
        "id": chat_completion_id(str_field(body, "id")),
        "object": "chat.completion",
        "created": body
            .get("created_at")
            .and_then(Value::as_i64)
            .unwrap_or_else(unix_timestamp),
        "model": body.get("model").cloned().unwrap_or_default(),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": openai_usage(input, output, total, cached),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_maps_to_message() {
        let body = json!({
            "id": "resp_1",
            "model": "gpt-test",
            "created_at": 1700000000,
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "hello"}]},
            ],
            "usage": {"input_tokens": 5, "output_tokens": 2, "total_tokens": 7,
                       "input_tokens_details": {"cached_tokens": 3}},
        });
        let out = map_response(&body);
        assert_eq!(out["choices"][0]["message"]["content"], "hello");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["created"], 1700000000);
        assert_eq!(out["usage"]["total_tokens"], 7);
        assert_eq!(out["usage"]["prompt_tokens_details"]["cached_tokens"], 3);
    }

    #[test]
    fn tool_calls_without_text_finish_as_tool_calls() {
        let body = json!({
            "id": "resp_2",
            "model": "gpt-test",
            "output": [
                {"type": "function_call", "call_id": "call_1", "name": "f",
                 "arguments": "{\"a\":1}"},
                {"type": "function_call", "call_id": "call_2", "name": "g",
                 "arguments": "{}"},
            ],
        });
        let out = map_response(&body);
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        let calls = out["choices"][0]["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["function"]["name"], "g");
    }

    #[test]
    fn incomplete_max_output_tokens_maps_to_length() {
        let body = json!({
            "id": "resp_3",
            "model": "m",
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "t"}]}],
            "incomplete_details": {"reason": "max_output_tokens"},
        });
        let out = map_response(&body);
        assert_eq!(out["choices"][0]["finish_reason"], "length");
    }
}
