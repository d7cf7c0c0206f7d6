use serde_json::{Value, json};

use crate::util::{arr_field, content_to_text, parse_tool_arguments, str_field};

/// Claude requires `max_tokens`; applied when the OpenAI request carries
/// no completion cap at all.
const DEFAULT_MAX_TOKENS: u64 = 4096;

/// Map an OpenAI chat-completions body to a Claude `/v1/messages` body
/// (`req_map openai_chat_to_anthropic_messages`).
pub fn map_request(body: &Value) -> Value {
    let mut system = String::new();
    let mut messages: Vec<Value> = Vec::new();

    for message in arr_field(body, "messages") {
        let role = str_field(message, "role").unwrap_or("user");
        match role {
            "system" | "developer" => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&text);
                }
            }
            "tool" => {
                // OpenAI tool results become user-side tool_result blocks.
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": message.get("tool_call_id").cloned().unwrap_or_default(),
                    "content": content_to_text(message.get("content").unwrap_or(&Value::Null)),
                });
                append_user_block(&mut messages, block);
            }
            "assistant" => {
                let mut blocks = Vec::new();
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                if !text.is_empty() {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for call in arr_field(message, "tool_calls") {
                    let function = call.get("function").cloned().unwrap_or(json!({}));
                    let arguments = str_field(&function, "arguments").unwrap_or("{}");
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.get("id").cloned().unwrap_or_default(),
                        "name": function.get("name").cloned().unwrap_or_default(),
                        "input": parse_tool_arguments(arguments),
                    }));
                }
                if !blocks.is_empty() {
                    messages.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            _ => {
                let text = content_to_text(message.get("content").unwrap_or(&Value::Null));
                messages.push(json!({ "role": "user", "content": text }));
            }
        }
    }

    let max_tokens = body
        .get("max_tokens")
        .or_else(|| body.get("max_completion_tokens"))
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut out = json!({
        "model": body.get("model").cloned().unwrap_or_default(),
        "messages": messages,
        "max_tokens": max_tokens,
    });
    let obj = out.as_object_mut().expect("object literal");

    if !system.is_empty() {
        obj.insert("system".to_string(), Value::String(system));
    }
    for key in ["temperature", "top_p", "stream"] {
        if let Some(value) = body.get(key).filter(|v| !v.is_null()) {
            obj.insert(key.to_string(), value.clone());
        }
    }
    if let Some(stop) = body.get("stop").filter(|v| !v.is_null()) {
        let sequences = match stop {
            Value::String(s) => json!([s]),
            other => other.clone(),
        };
        obj.insert("stop_sequences".to_string(), sequences);
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array)
        && !tools.is_empty()
    {
        let mapped: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let function = tool.get("function").cloned().unwrap_or(json!({}));
                json!({
                    "name": function.get("name").cloned().unwrap_or_default(),
                    "description": function.get("description").cloned().unwrap_or(Value::Null),
                    "input_schema": function.get("parameters").cloned().unwrap_or(json!({})),
                })
            })
            .collect();
        obj.insert("tools".to_string(), Value::Array(mapped));
    }
    out
}

/// Merge a block into the trailing user message, or start a new one.
fn append_user_block(messages: &mut Vec<Value>, block: Value) {
    if let Some(last) = messages.last_mut()
        && str_field(last, "role") == Some("user")
        && last.get("content").is_some_and(Value::is_array)
        && let Some(blocks) = last.get_mut("content").and_then(Value::as_array_mut)
    {
        blocks.push(block);
        return;
    }
    messages.push(json!({ "role": "user", "content": [block] }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_stop_mapping() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "system", "content": "a"},
                {"role": "system", "content": "b"},
                {"role": "user", "content": "hi"},
            ],
            "max_tokens": 7,
            "stop": "END",
        });
        let out = map_request(&body);
        assert_eq!(out["system"], "a\nb");
        assert_eq!(out["max_tokens"], 7);
        assert_eq!(out["stop_sequences"], json!(["END"]));
        assert_eq!(out["messages"][0]["content"], "hi");
    }

    #[test]
    fn default_max_tokens_applied() {
        let body = json!({"model": "m", "messages": [{"role": "user", "content": "x"}]});
        let out = map_request(&body);
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_calls_and_results() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "f", "arguments": "{\"a\":1}"}},
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "ok"},
            ],
        });
        let out = map_request(&body);
        assert_eq!(out["messages"][0]["content"][0]["type"], "tool_use");
        assert_eq!(out["messages"][0]["content"][0]["input"], json!({"a": 1}));
        assert_eq!(out["messages"][1]["role"], "user");
        assert_eq!(out["messages"][1]["content"][0]["type"], "tool_result");
        assert_eq!(out["messages"][1]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn invalid_arguments_become_empty_input() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "tool_calls": [
                    {"id": "c", "function": {"name": "f", "arguments": "oops"}},
                ]},
            ],
        });
        let out = map_request(&body);
        assert_eq!(out["messages"][0]["content"][0]["input"], json!({}));
    }
}
