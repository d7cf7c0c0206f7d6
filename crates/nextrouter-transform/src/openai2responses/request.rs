use serde_json::{Value, json};

use crate::util::{arr_field, content_to_text, str_field};

/// Map an OpenAI chat-completions body to a Responses body
/// (`req_map openai_chat_to_openai_responses`).
pub fn map_request(body: &Value) -> Value {
    let mut instructions = String::new();
    let mut input = Vec::new();

    for message in arr_field(body, "messages") {
        let role = str_field(message, "role").unwrap_or("user");
        match role {
            "system" | "developer" => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    if !instructions.is_empty() {
                        instructions.push('\n');
                    }
                    instructions.push_str(&text);
                }
            }
            "tool" => {
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": message.get("tool_call_id").cloned().unwrap_or_default(),
                    "output": content_to_text(message.get("content").unwrap_or(&Value::Null)),
                }));
            }
            "assistant" => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    input.push(json!({
                        "role": "assistant",
                        "content": [{ "type": "output_text", "text": text }],
                    }));
                }
                for call in arr_field(message, "tool_calls") {
                    let function = call.get("function").cloned().unwrap_or(json!({}));
                    input.push(json!({
                        "type": "function_call",
                        "call_id": call.get("id").cloned().unwrap_or_default(),
                        "name": function.get("name").cloned().unwrap_or_default(),
                        "arguments": function.get("arguments").cloned().unwrap_or(json!("{}")),
                    }));
                }
            }
            _ => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                input.push(json!({
                    "role": "user",
                    "content": [{ "type": "input_text", "text": text }],
                }));
            }
        }
    }

    let mut out = json!({
        "model": body.get("model").cloned().unwrap_or_default(),
        "input": input,
    });
    let obj = out.as_object_mut().expect("object literal");

    if !instructions.is_empty() {
        obj.insert("instructions".to_string(), Value::String(instructions));
    }
    if let Some(max) = body
        .get("max_completion_tokens")
        .or_else(|| body.get("max_tokens"))
        .filter(|v| !v.is_null())
    {
        obj.insert("max_output_tokens".to_string(), max.clone());
    }
    for key in ["temperature", "top_p", "stream"] {
        if let Some(value) = body.get(key).filter(|v| !v.is_null()) {
            obj.insert(key.to_string(), value.clone());
        }
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array)
        && !tools.is_empty()
    {
        let mapped: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let function = tool.get("function").cloned().unwrap_or(json!({}));
                json!({
                    "type": "function",
                    "name": function.get("name").cloned().unwrap_or_default(),
                    "description": function.get("description").cloned().unwrap_or(Value::Null),
                    "parameters": function.get("parameters").cloned().unwrap_or(json!({})),
                })
            })
            .collect();
        obj.insert("tools".to_string(), Value::Array(mapped));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_goes_to_instructions() {
        let body = json!({
            "model": "gpt-test",
            "messages": [
                {"role": "system", "content": "rule one"},
                {"role": "system", "content": "rule two"},
                {"role": "user", "content": "hi"},
            ],
            "max_tokens": 64,
            "stream": true,
        });
        let out = map_request(&body);
        assert_eq!(out["instructions"], "rule one\nrule two");
        assert_eq!(out["input"][0]["role"], "user");
        assert_eq!(out["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(out["max_output_tokens"], 64);
        assert_eq!(out["stream"], true);
    }

    #[test]
    fn tool_round_trip_items() {
        let body = json!({
            "model": "gpt-test",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "f", "arguments": "{\"a\":1}"}},
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "ok"},
            ],
        });
        let out = map_request(&body);
        assert_eq!(out["input"][0]["type"], "function_call");
        assert_eq!(out["input"][0]["call_id"], "call_1");
        assert_eq!(out["input"][1]["type"], "function_call_output");
        assert_eq!(out["input"][1]["output"], "ok");
    }
}
