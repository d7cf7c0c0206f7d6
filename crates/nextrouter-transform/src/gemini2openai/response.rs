use serde_json::{Value, json};

use nextrouter_protocol::finish::gemini_to_openai;
use nextrouter_protocol::ids::{chat_completion_id, unix_timestamp};

use crate::util::{arguments_to_string, arr_field, gemini_usage_counts, openai_usage, str_field};

/// Map a Gemini generateContent response to a chat completion
/// (`resp_map gemini_to_openai_chat`).
pub fn map_response(body: &Value) -> Value {
    let mut choices = Vec::new();
    for (idx, candidate) in arr_field(body, "candidates").iter().enumerate() {
        let index = candidate
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(idx as u64);
        let parts = candidate
            .get("content")
            .map(|content| arr_field(content, "parts"))
            .unwrap_or(&[]);

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(chunk) = str_field(part, "text") {
                text.push_str(chunk);
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(json!({
                    "id": call
                        .get("id")
                        .cloned()
                        .unwrap_or_else(|| json!(format!("call_{index}_{}", tool_calls.len()))),
                    "type": "function",
                    "function": {
                        "name": call.get("name").cloned().unwrap_or_default(),
                        "arguments": arguments_to_string(call.get("args").unwrap_or(&Value::Null)),
                    }
                }));
            }
        }

        let finish_reason = str_field(candidate, "finishReason")
            .map(gemini_to_openai)
            .unwrap_or("stop");

        let mut message = json!({ "role": "assistant" });
        let obj = message.as_object_mut().expect("object literal");
        obj.insert(
            "content".to_string(),
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            },
        );
        if !tool_calls.is_empty() {
            obj.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }

        choices.push(json!({
            "index": index,
            "message": message,
            "finish_reason": finish_reason,
        }));
    }

    let usage = body.get("usageMetadata").cloned().unwrap_or(json!({}));
    let (input, output, total) = gemini_usage_counts(&usage);
    let cached = usage.get("cachedContentTokenCount").and_then(Value::as_u64);

    json!({
        "id": chat_completion_id(str_field(body, "responseId")),
        "object": "chat.completion",
        "created": unix_timestamp(),
        "model": model_name(body),
        "choices": choices,
        "usage": openai_usage(input, output, total, cached),
    })
}

fn model_name(body: &Value) -> Value {
    match str_field(body, "modelVersion") {
        Some(model) => json!(model.strip_prefix("models/").unwrap_or(model)),
        None => Value::String(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_candidate_to_choice() {
        let body = json!({
            "modelVersion": "models/gemini-2.0-flash",
            "candidates": [{
                "content": {"parts": [{"text": "Hi"}], "role": "model"},
                "finishReason": "STOP",
                "index": 0,
            }],
            "usageMetadata": {"promptTokenCount": 1, "candidatesTokenCount": 2,
                               "totalTokenCount": 3},
        });
        let out = map_response(&body);
        assert_eq!(out["model"], "gemini-2.0-flash");
        assert_eq!(out["choices"][0]["message"]["content"], "Hi");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 3);
    }

    #[test]
    fn thoughts_count_into_completion() {
        let body = json!({
            "candidates": [],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 3,
                               "thoughtsTokenCount": 4},
        });
        let out = map_response(&body);
        assert_eq!(out["usage"]["completion_tokens"], 7);
        assert_eq!(out["usage"]["total_tokens"], 9);
    }

    #[test]
    fn function_call_candidate() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "f", "args": {"x": 2}}}]},
                "finishReason": "STOP",
            }],
        });
        let out = map_response(&body);
        let call = &out["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["function"]["arguments"], "{\"x\":2}");
    }
}
