use serde_json::{Value, json};

use nextrouter_protocol::finish::claude_to_openai;
use nextrouter_protocol::ids::{chat_completion_id, unix_timestamp};

use crate::util::{arguments_to_string, arr_field, str_field, u64_field};

/// Map a Claude messages response to an OpenAI chat completion
/// (`resp_map anthropic_to_openai_chat`).
pub fn map_response(body: &Value) -> Value {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in arr_field(body, "content") {
        match str_field(block, "type") {
            Some("text") => {
                if let Some(part) = str_field(block, "text") {
                    text.push_str(part);
                }
            }
            Some("tool_use") => {
                tool_calls.push(json!({
                    "id": block.get("id").cloned().unwrap_or_default(),
                    "type": "function",
                    "function": {
                        "name": block.get("name").cloned().unwrap_or_default(),
                        "arguments": arguments_to_string(
                            block.get("input").unwrap_or(&Value::Null),
                        ),
                    }
                }));
            }
            _ => {}
        }
    }

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

    let finish_reason = str_field(body, "stop_reason")
        .map(claude_to_openai)
        .unwrap_or("stop");

    let usage = body.get("usage").cloned().unwrap_or(json!({}));
    let input = u64_field(&usage, "input_tokens");
    let output = u64_field(&usage, "output_tokens");
    let cached = usage.get("cache_read_input_tokens").and_then(Value::as_u64);

    json!({
        "id": chat_completion_id(str_field(body, "id")),
        "object": "chat.completion",
        "created": unix_timestamp(),
        "model": body.get("model").cloned().unwrap_or_default(),
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason,
        }],
        "usage": crate::util::openai_usage(input, output, input + output, cached),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_text_response() {
        let body = json!({
            "id": "msg_1",
            "model": "claude-haiku-4-5",
            "content": [{"type": "text", "text": "Hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 4},
        });
        let out = map_response(&body);
        assert_eq!(out["object"], "chat.completion");
        assert!(out["id"].as_str().unwrap().starts_with("chatcmpl_"));
        assert_eq!(out["choices"][0]["message"]["content"], "Hi");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["prompt_tokens"], 12);
        assert_eq!(out["usage"]["completion_tokens"], 4);
        assert_eq!(out["usage"]["total_tokens"], 16);
    }

    #[test]
    fn maps_tool_use_response() {
        let body = json!({
            "id": "msg_2",
            "model": "m",
            "content": [{"type": "tool_use", "id": "toolu_9", "name": "f", "input": {"a": 1}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 1, "output_tokens": 1},
        });
        let out = map_response(&body);
        let call = &out["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["name"], "f");
        assert_eq!(call["function"]["arguments"], "{\"a\":1}");
        assert_eq!(out["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(out["choices"][0]["message"]["content"], Value::Null);
    }

    #[test]
    fn cached_tokens_surface_in_details() {
        let body = json!({
            "id": "msg_3",
            "model": "m",
            "content": [],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 1, "cache_read_input_tokens": 7},
        });
        let out = map_response(&body);
        assert_eq!(out["usage"]["prompt_tokens_details"]["cached_tokens"], 7);
    }
}
