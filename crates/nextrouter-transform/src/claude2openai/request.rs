use serde_json::{Value, json};

use crate::util::{arguments_to_string, arr_field, claude_content_to_text, str_field};

/// Map a Claude `POST /v1/messages` body to an OpenAI chat-completions
/// body (`req_map anthropic_to_openai_chat`).
pub fn map_request(body: &Value) -> Value {
    let mut messages = Vec::new();

    // Claude `system` (string or block list) becomes a leading system
    // message.
    if let Some(system) = body.get("system") {
        let text = match system {
            Value::String(text) => text.clone(),
            Value::Array(_) => claude_content_to_text(system),
            _ => String::new(),
        };
        if !text.is_empty() {
            messages.push(json!({ "role": "system", "content": text }));
        }
    }

    for message in arr_field(body, "messages") {
        let role = str_field(message, "role").unwrap_or("user");
        let content = message.get("content").cloned().unwrap_or(Value::Null);
        match content {
            Value::String(text) => {
                messages.push(json!({ "role": role, "content": text }));
            }
            Value::Array(blocks) => {
                push_block_messages(&mut messages, role, &blocks);
            }
            _ => {}
        }
    }

    let mut out = json!({
        "model": body.get("model").cloned().unwrap_or_default(),
        "messages": messages,
    });
    let obj = out.as_object_mut().expect("object literal");

    if let Some(max_tokens) = body.get("max_tokens").filter(|v| !v.is_null()) {
        obj.insert("max_tokens".to_string(), max_tokens.clone());
    }
    for key in ["temperature", "top_p", "stream"] {
        if let Some(value) = body.get(key).filter(|v| !v.is_null()) {
            obj.insert(key.to_string(), value.clone());
        }
    }
    if let Some(stops) = body.get("stop_sequences").filter(|v| !v.is_null()) {
        obj.insert("stop".to_string(), stops.clone());
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array)
        && !tools.is_empty()
    {
        let mapped: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.get("name").cloned().unwrap_or_default(),
                        "description": tool.get("description").cloned().unwrap_or(Value::Null),
                        "parameters": tool.get("input_schema").cloned().unwrap_or(json!({})),
                    }
                })
            })
            .collect();
        obj.insert("tools".to_string(), Value::Array(mapped));
    }
    out
}

fn push_block_messages(messages: &mut Vec<Value>, role: &str, blocks: &[Value]) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match str_field(block, "type") {
            Some("text") => {
                if let Some(part) = str_field(block, "text") {
                    if !text.is_empty() {
                        text.push('\n');
                    }
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
            Some("tool_result") => {
                // Each tool_result becomes its own `tool` role message.
                let content = block.get("content").cloned().unwrap_or(Value::Null);
                let flattened = match &content {
                    Value::String(s) => s.clone(),
                    Value::Array(_) => claude_content_to_text(&content),
                    _ => String::new(),
                };
                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": block.get("tool_use_id").cloned().unwrap_or_default(),
                    "content": flattened,
                }));
            }
            _ => {}
        }
    }

    if text.is_empty() && tool_calls.is_empty() {
        return;
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
