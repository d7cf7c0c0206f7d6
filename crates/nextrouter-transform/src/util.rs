//! Shared helpers for the JSON codecs.

use serde_json::{Map, Value, json};

pub fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

pub fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

pub fn arr_field<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Flatten an OpenAI message `content` field (string or part array) into
/// plain text.
pub fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                let text = str_field(part, "text")
                    .or_else(|| str_field(part, "input_text"))
                    .unwrap_or_default();
                if !text.is_empty() {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// Flatten Claude message content (string or block array) into text,
/// ignoring non-text blocks.
pub fn claude_content_to_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => {
            let mut out = String::new();
            for block in blocks {
                if str_field(block, "type") == Some("text")
                    && let Some(text) = str_field(block, "text")
                {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// Tool-call arguments arrive as a JSON string on the OpenAI side; when
/// they do not parse to an object, map to an empty object without raising.
pub fn parse_tool_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    }
}

/// Serialize a tool-argument object back to the OpenAI JSON-string form.
pub fn arguments_to_string(args: &Value) -> String {
    match args {
        Value::Object(_) => args.to_string(),
        Value::String(s) => s.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// OpenAI usage object carrying both the legacy and the new field names.
pub fn openai_usage(input: u64, output: u64, total: u64, cached: Option<u64>) -> Value {
    let mut usage = json!({
        "prompt_tokens": input,
        "completion_tokens": output,
        "input_tokens": input,
        "output_tokens": output,
        "total_tokens": total,
    });
    if let Some(cached) = cached
        && cached > 0
        && let Some(obj) = usage.as_object_mut()
    {
        obj.insert(
            "prompt_tokens_details".to_string(),
            json!({ "cached_tokens": cached }),
        );
    }
    usage
}

/// Gemini usageMetadata → (input, output, total) with
/// `completion = candidatesTokenCount + thoughtsTokenCount` and the total
/// taken from `totalTokenCount` when present.
pub fn gemini_usage_counts(usage: &Value) -> (u64, u64, u64) {
    let input = u64_field(usage, "promptTokenCount");
    let output = u64_field(usage, "candidatesTokenCount") + u64_field(usage, "thoughtsTokenCount");
    let total = usage
        .get("totalTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(input + output);
    (input, output, total)
}
