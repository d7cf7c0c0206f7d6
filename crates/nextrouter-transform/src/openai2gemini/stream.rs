use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Value, json};

use nextrouter_protocol::finish::openai_to_gemini;
use nextrouter_protocol::sse::{SseEvent, data_frame, done_frame};

use crate::util::{arr_field, parse_tool_arguments, str_field, u64_field};

use crate::dispatch::SseTransform;

/// OpenAI chat-completion chunks → Gemini streamGenerateContent SSE
/// (`sse_parse openai_to_gemini_chunks`).
///
/// Gemini has no incremental function-call encoding, so tool-call argument
/// deltas are buffered per index and flushed as whole `functionCall` parts
/// with the final event.
pub struct ChatToGeminiChunks {
    model: String,
    tool_args: BTreeMap<u64, (String, String)>,
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    finish_reason: Option<&'static str>,
    done_sent: bool,
    final_sent: bool,
}

impl ChatToGeminiChunks {
    pub fn new(model_hint: &str) -> Self {
        Self {
            model: model_hint.to_string(),
            tool_args: BTreeMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            finish_reason: None,
            done_sent: false,
            final_sent: false,
        }
    }

    fn final_event(&mut self) -> Option<Bytes> {
        if self.final_sent {
            return None;
        }
        self.final_sent = true;

        let mut parts = Vec::new();
        for (_, (name, args)) in std::mem::take(&mut self.tool_args) {
            parts.push(json!({
                "functionCall": { "name": name, "args": parse_tool_arguments(&args) }
            }));
        }
        let payload = json!({
            "candidates": [{
                "content": { "parts": parts, "role": "model" },
                "finishReason": self.finish_reason.unwrap_or("STOP"),
                "index": 0,
            }],
            "usageMetadata": {
                "promptTokenCount": self.input_tokens,
                "candidatesTokenCount": self.output_tokens,
                "totalTokenCount": if self.total_tokens > 0 {
                    self.total_tokens
                } else {
                    self.input_tokens + self.output_tokens
                },
            },
            "modelVersion": self.model,
        });
        Some(data_frame(&payload.to_string()))
    }

    fn tail_frames(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        out.extend(self.final_event());
        if !self.done_sent {
            self.done_sent = true;
            out.push(done_frame());
        }
        out
    }
}

impl SseTransform for ChatToGeminiChunks {
    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes> {
        if event.data.is_empty() {
            return vec![event.encode()];
        }
        if event.is_done() {
            return self.tail_frames();
        }
        let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
            return Vec::new();
        };

        if let Some(model) = str_field(&payload, "model")
            && !model.is_empty()
        {
            self.model = model.to_string();
        }
        if let Some(usage) = payload.get("usage").filter(|v| v.is_object()) {
            self.input_tokens = self.input_tokens.max(u64_field(usage, "prompt_tokens"));
            self.output_tokens = self.output_tokens.max(u64_field(usage, "completion_tokens"));
            self.total_tokens = self.total_tokens.max(u64_field(usage, "total_tokens"));
        }

        let mut out = Vec::new();
        for choice in arr_field(&payload, "choices") {
            let delta = choice.get("delta").cloned().unwrap_or(json!({}));
            let index = choice.get("index").and_then(Value::as_u64).unwrap_or(0);

            if let Some(text) = str_field(&delta, "content")
                && !text.is_empty()
            {
                let event = json!({
                    "candidates": [{
                        "content": { "parts": [{ "text": text }], "role": "model" },
                        "index": index,
                    }],
                });
                out.push(data_frame(&event.to_string()));
            }

            for call in arr_field(&delta, "tool_calls") {
                let tool_index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let entry = self.tool_args.entry(tool_index).or_default();
                if let Some(function) = call.get("function") {
                    if let Some(name) = str_field(function, "name")
                        && !name.is_empty()
                    {
                        entry.0 = name.to_string();
                    }
                    if let Some(args) = str_field(function, "arguments") {
                        entry.1.push_str(args);
                    }
                }
            }

            if let Some(reason) = str_field(choice, "finish_reason") {
                self.finish_reason = Some(openai_to_gemini(reason));
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        self.tail_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nextrouter_protocol::sse::SseParser;

    fn run(payloads: &[&str]) -> String {
        let mut transform = ChatToGeminiChunks::new("gemini-2.0-flash");
        let mut parser = SseParser::new();
        let mut out = Vec::new();
        for payload in payloads {
            for event in parser.push_str(&format!("data: {payload}\n\n")) {
                out.extend(transform.on_event(&event));
            }
        }
        out.extend(transform.finish());
        out.iter()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .collect()
    }

    #[test]
    fn text_deltas_become_candidate_events() {
        let out = run(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"Hi"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
            "[DONE]",
        ]);
        assert!(out.contains("\"text\":\"Hi\""));
        assert!(out.contains("\"finishReason\":\"STOP\""));
        assert!(out.contains("\"totalTokenCount\":3"));
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }

    #[test]
    fn buffered_tool_args_flush_with_final_event() {
        let out = run(&[
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"f","arguments":"{\"a\":"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]}}]}"#,
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]);
        assert!(out.contains("\"functionCall\""));
        assert!(out.contains("\"args\":{\"a\":1}"));
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }
}
