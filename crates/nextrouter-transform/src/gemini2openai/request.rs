use serde_json::{Value, json};

use crate::dispatch::StreamCtx;
use crate::util::{arguments_to_string, arr_field, str_field};

/// Map a Gemini generateContent body to an OpenAI chat-completions body
/// (`req_map gemini_to_openai_chat`). Gemini carries the model in the URL
/// and the stream flag in the action, so both come in through the context.
pub fn map_request(body: &Value, ctx: StreamCtx<'_>) -> Value {
    let mut messages = Vec::new();

    if let Some(system) = body
        .get("system_instruction")
        .or_else(|| body.get("systemInstruction"))
    {
        let text = parts_to_text(arr_field(system, "parts"));
        if !text.is_empty() {
            messages.push(json!({ "role": "system", "content": text }));
        }
    }

    for content in arr_field(body, "contents") {
        let role = match str_field(content, "role") {
            Some("model") => "assistant",
            _ => "user",
        };
        let parts = arr_field(content, "parts");

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(chunk) = str_field(part, "text") {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(chunk);
            }
            if let Some(call) = part.get("functionCall") {
                tool_calls.push(json!({
                    "id": call
                        .get("id")
                        .cloned()
                        .unwrap_or_else(|| json!(format!("call_{}", tool_calls.len()))),
                    "type": "function",
                    "function": {
                        "name": call.get("name").cloned().unwrap_or_default(),
                        "arguments": arguments_to_string(call.get("args").unwrap_or(&Value::Null)),
                    }
                }));
            }
            if let Some(resp) = part.get("functionResponse") {
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": resp.get("name").cloned().unwrap_or_default(),
                    "content": resp
                        .get("response")
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                }));
            }
        }

        if text.is_empty() && tool_calls.is_empty() {
            continue;
        }
        let mut message = json!({ "role": role });
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
        messages.push(message);
    }

    let mut out = json!({
        "model": ctx.model,
        "messages": messages,
    });
    let obj = out.as_object_mut().expect("object literal");
    if ctx.stream {
        obj.insert("stream".to_string(), json!(true));
    }

    if let Some(config) = body
        .get("generationConfig")
        .or_else(|| body.get("generation_config"))
    {
        for (from, to) in [
            ("temperature", "temperature"),
            ("topP", "top_p"),
            ("maxOutputTokens", "max_tokens"),
            ("stopSequences", "stop"),
        ] {
            if let Some(value) = config.get(from).filter(|v| !v.is_null()) {
                obj.insert(to.to_string(), value.clone());
            }
        }
    }

    let mut functions = Vec::new();
    for tool in arr_field(body, "tools") {
        for decl in arr_field(tool, "functionDeclarations") {
            functions.push(json!({
                "type": "function",
                "function": {
                    "name": decl.get("name").cloned().unwrap_or_default(),
                    "description": decl.get("description").cloned().unwrap_or(Value::Null),
                    "parameters": decl.get("parameters").cloned().unwrap_or(json!({})),
                }
            }));
        }
    }
    if !functions.is_empty() {
        obj.insert("tools".to_string(), Value::Array(functions));
    }
    out
}

fn parts_to_text(parts: &[Value]) -> String {
    let mut out = String::new();
    for part in parts {
        if let Some(text) = str_field(part, "text") {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_contents_and_config() {
        let body = json!({
            "system_instruction": {"parts": [{"text": "be kind"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"text": "hello"}]},
            ],
            "generationConfig": {"temperature": 0.5, "maxOutputTokens": 100},
        });
        let ctx = StreamCtx {
            model: "gemini-2.0-flash",
            stream: true,
        };
        let out = map_request(&body, ctx);
        assert_eq!(out["model"], "gemini-2.0-flash");
        assert_eq!(out["messages"][0]["role"], "system");
        assert_eq!(out["messages"][2]["role"], "assistant");
        assert_eq!(out["stream"], true);
        assert_eq!(out["temperature"], 0.5);
        assert_eq!(out["max_tokens"], 100);
    }

    #[test]
    fn function_call_and_response() {
        let body = json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "f", "args": {"a": 1}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "f", "response": {"ok": true}}}]},
            ],
        });
        let out = map_request(&body, StreamCtx::default());
        assert_eq!(out["messages"][0]["tool_calls"][0]["function"]["name"], "f");
        assert_eq!(
            out["messages"][0]["tool_calls"][0]["function"]["arguments"],
            "{\"a\":1}"
        );
        assert_eq!(out["messages"][1]["role"], "tool");
    }
}
