use serde_json::{Value, json};

use nextrouter_protocol::finish::openai_to_gemini;

use crate::util::{arr_field, parse_tool_arguments, str_field, u64_field};

/// Map an OpenAI chat completion to a Gemini generateContent response
/// (`resp_map openai_to_gemini_chat` / `openai_to_gemini_generate_content`;
/// both targets share the REST response shape).
pub fn map_response(body: &Value) -> Value {
    let mut candidates = Vec::new();
    for (idx, choice) in arr_field(body, "choices").iter().enumerate() {
        let index = choice
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(idx as u64);
        let message = choice.get("message").cloned().unwrap_or(json!({}));

        let mut parts = Vec::new();
        if let Some(text) = str_field(&message, "content")
            && !text.is_empty()
        {
            parts.push(json!({ "text": text }));
        }
        for call in arr_field(&message, "tool_calls") {
            let function = call.get("function").cloned().unwrap_or(json!({}));
            parts.push(json!({
                "functionCall": {
                    "name": function.get("name").cloned().unwrap_or_default(),
                    "args": parse_tool_arguments(
                        str_field(&function, "arguments").unwrap_or("{}"),
                    ),
                }
            }));
        }

        let finish = str_field(choice, "finish_reason")
            .map(openai_to_gemini)
            .unwrap_or("STOP");

        candidates.push(json!({
            "content": { "parts": parts, "role": "model" },
            "finishReason": finish,
            "index": index,
        }));
    }

    let usage = body.get("usage").cloned().unwrap_or(json!({}));
    let input = usage
        .get("prompt_tokens")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| u64_field(&usage, "input_tokens"));
    let output = usage
        .get("completion_tokens")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| u64_field(&usage, "output_tokens"));
    let total = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(input + output);

    json!({
        "candidates": candidates,
        "usageMetadata": {
            "promptTokenCount": input,
            "candidatesTokenCount": output,
            "totalTokenCount": total,
        },
        "modelVersion": body.get("model").cloned().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_choice_to_candidate() {
        let body = json!({
            "id": "chatcmpl_1",
            "model": "gpt-test",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hey"},
                "finish_reason": "length",
            }],
            "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5},
        });
        let out = map_response(&body);
        assert_eq!(out["candidates"][0]["content"]["parts"][0]["text"], "hey");
        assert_eq!(out["candidates"][0]["finishReason"], "MAX_TOKENS");
        assert_eq!(out["usageMetadata"]["totalTokenCount"], 5);
        assert_eq!(out["modelVersion"], "gpt-test");
    }

    #[test]
    fn tool_calls_become_function_call_parts() {
        let body = json!({
            "choices": [{
                "message": {"role": "assistant", "tool_calls": [
                    {"id": "c", "function": {"name": "f", "arguments": "{\"z\":9}"}},
                ]},
                "finish_reason": "tool_calls",
            }],
        });
        let out = map_response(&body);
        let part = &out["candidates"][0]["content"]["parts"][0];
        assert_eq!(part["functionCall"]["name"], "f");
        assert_eq!(part["functionCall"]["args"], json!({"z": 9}));
    }
}
