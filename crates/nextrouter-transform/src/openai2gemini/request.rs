use serde_json::{Value, json};

use crate::util::{arr_field, content_to_text, parse_tool_arguments, str_field};

/// Map an OpenAI chat-completions body to a Gemini generateContent body
/// (`req_map openai_chat_to_gemini_generate_content`). The model never
/// appears in a Gemini body; the engine routes it through the URL.
pub fn map_request(body: &Value) -> Value {
    let mut system_parts = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in arr_field(body, "messages") {
        let role = str_field(message, "role").unwrap_or("user");
        match role {
            "system" | "developer" => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    system_parts.push(json!({ "text": text }));
                }
            }
            "assistant" => {
                let mut parts = Vec::new();
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
                for call in arr_field(message, "tool_calls") {
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
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
            "tool" => {
                let name = str_field(message, "tool_call_id").unwrap_or_default();
                let raw = content_to_text(message.get("content").unwrap_or(&Value::Null));
                let response = match serde_json::from_str::<Value>(&raw) {
                    Ok(value @ Value::Object(_)) => value,
                    _ => json!({ "content": raw }),
                };
                contents.push(json!({
                    "role": "user",
                    "parts": [{ "functionResponse": { "name": name, "response": response } }],
                }));
            }
            _ => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                contents.push(json!({ "role": "user", "parts": [{ "text": text }] }));
            }
        }
    }

    let mut out = json!({ "contents": contents });
    let obj = out.as_object_mut().expect("object literal");

    if !system_parts.is_empty() {
        obj.insert(
            "system_instruction".to_string(),
            json!({ "parts": system_parts }),
        );
    }

    let mut config = serde_json::Map::new();
    for (from, to) in [
        ("temperature", "temperature"),
        ("top_p", "topP"),
        ("max_tokens", "maxOutputTokens"),
        ("max_completion_tokens", "maxOutputTokens"),
    ] {
        if let Some(value) = body.get(from).filter(|v| !v.is_null())
            && !config.contains_key(to)
        {
            config.insert(to.to_string(), value.clone());
        }
    }
    if let Some(stop) = body.get("stop").filter(|v| !v.is_null()) {
        let sequences = match stop {
            Value::String(s) => json!([s]),
            other => other.clone(),
        };
        config.insert("stopSequences".to_string(), sequences);
    }
    if !config.is_empty() {
        obj.insert("generationConfig".to_string(), Value::Object(config));
    }

    let declarations: Vec<Value> = arr_field(body, "tools")
        .iter()
        .map(|tool| {
            let function = tool.get("function").cloned().unwrap_or(json!({}));
            json!({
                "name": function.get("name").cloned().unwrap_or_default(),
                "description": function.get("description").cloned().unwrap_or(Value::Null),
                "parameters": function.get("parameters").cloned().unwrap_or(json!({})),
            })
        })
        .collect();
    if !declarations.is_empty() {
        obj.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
    }
    out
}
