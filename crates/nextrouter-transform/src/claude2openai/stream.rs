use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Value, json};

use nextrouter_protocol::finish::claude_to_openai;
use nextrouter_protocol::sse::SseEvent;

use crate::chunks::ChatChunkEmitter;
use crate::dispatch::SseTransform;
use crate::util::{openai_usage, str_field, u64_field};

/// Claude messages SSE → OpenAI chat-completion chunks
/// (`sse_parse anthropic_to_openai_chunks`).
pub struct ClaudeToChatChunks {
    emitter: ChatChunkEmitter,
    /// Claude content-block index → OpenAI tool-call index.
    tool_blocks: BTreeMap<u64, i64>,
    next_tool_index: i64,
    input_tokens: u64,
    output_tokens: u64,
    cached_tokens: u64,
    finish_reason: Option<&'static str>,
    finish_emitted: bool,
}

impl ClaudeToChatChunks {
    pub fn new(model_hint: &str) -> Self {
        Self {
            emitter: ChatChunkEmitter::new(model_hint),
            tool_blocks: BTreeMap::new(),
            next_tool_index: 0,
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
            finish_reason: None,
            finish_emitted: false,
        }
    }

    fn absorb_usage(&mut self, usage: &Value) {
        let input = u64_field(usage, "input_tokens");
        let output = u64_field(usage, "output_tokens");
        let cached = u64_field(usage, "cache_read_input_tokens");
        if input > 0 {
            self.input_tokens = self.input_tokens.max(input);
        }
        if output > 0 {
            self.output_tokens = self.output_tokens.max(output);
        }
        if cached > 0 {
            self.cached_tokens = self.cached_tokens.max(cached);
        }
    }

    fn finish_frames(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if !self.finish_emitted {
            self.finish_emitted = true;
            let usage = openai_usage(
                self.input_tokens,
                self.output_tokens,
                self.input_tokens + self.output_tokens,
                (self.cached_tokens > 0).then_some(self.cached_tokens),
            );
            let finish = self.finish_reason.unwrap_or("stop");
            out.push(self.emitter.chunk(0, json!({}), Some(finish), Some(usage)));
        }
        out.extend(self.emitter.done());
        out
    }
}

impl SseTransform for ClaudeToChatChunks {
    fn on_event(&mut self, event: &SseEvent) -> Vec<Bytes> {
        if event.data.is_empty() {
            return vec![event.encode()];
        }
        if event.is_done() {
            return self.finish_frames();
        }
        let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
            return Vec::new();
        };
        let kind = str_field(&payload, "type")
            .map(str::to_owned)
            .or_else(|| event.event.clone())
            .unwrap_or_default();

        match kind.as_str() {
            "message_start" => {
                let message = payload.get("message").cloned().unwrap_or(json!({}));
                if let Some(id) = str_field(&message, "id") {
                    self.emitter.adopt_id(id);
                }
                if let Some(model) = str_field(&message, "model") {
                    self.emitter.adopt_model(model);
                }
                if let Some(usage) = message.get("usage") {
                    self.absorb_usage(usage);
                }
                Vec::new()
            }
            "content_block_start" => {
                let index = u64_field(&payload, "index");
                let block = payload.get("content_block").cloned().unwrap_or(json!({}));
                if str_field(&block, "type") == Some("tool_use") {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_blocks.insert(index, tool_index);
                    let delta = json!({
                        "tool_calls": [{
                            "index": tool_index,
                            "id": block.get("id").cloned().unwrap_or_default(),
                            "type": "function",
                            "function": {
                                "name": block.get("name").cloned().unwrap_or_default(),
                                "arguments": "",
                            }
                        }]
                    });
                    return vec![self.emitter.chunk(0, delta, None, None)];
                }
                Vec::new()
            }
            "content_block_delta" => {
                let index = u64_field(&payload, "index");
                let delta = payload.get("delta").cloned().unwrap_or(json!({}));
                match str_field(&delta, "type") {
                    Some("text_delta") => {
                        let text = str_field(&delta, "text").unwrap_or_default();
                        if text.is_empty() {
                            return Vec::new();
                        }
                        vec![self.emitter.chunk(0, json!({ "content": text }), None, None)]
                    }
                    Some("input_json_delta") => {
                        let Some(tool_index) = self.tool_blocks.get(&index).copied() else {
                            return Vec::new();
                        };
                        let partial = str_field(&delta, "partial_json").unwrap_or_default();
                        let delta = json!({
                            "tool_calls": [{
                                "index": tool_index,
                                "function": { "arguments": partial },
                            }]
                        });
                        vec![self.emitter.chunk(0, delta, None, None)]
                    }
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(delta) = payload.get("delta")
                    && let Some(reason) = str_field(delta, "stop_reason")
                {
                    self.finish_reason = Some(claude_to_openai(reason));
                }
                if let Some(usage) = payload.get("usage") {
                    self.absorb_usage(usage);
                }
                Vec::new()
            }
            "message_stop" => self.finish_frames(),
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<Bytes> {
        if self.emitter.done_sent() {
            return Vec::new();
        }
        self.finish_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nextrouter_protocol::sse::SseParser;

    fn run(events: &[(&str, &str)]) -> String {
        let mut transform = ClaudeToChatChunks::new("claude-haiku-4-5");
        let mut parser = SseParser::new();
        let mut out = Vec::new();
        for (name, data) in events {
            for event in parser.push_str(&format!("event: {name}\ndata: {data}\n\n")) {
                out.extend(transform.on_event(&event));
            }
        }
        out.extend(transform.finish());
        out.iter()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .collect()
    }

    #[test]
    fn tool_use_stream_maps_to_tool_call_chunks() {
        let out = run(&[
            (
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_1","model":"claude-haiku-4-5","usage":{"input_tokens":9}}}"#,
            ),
            (
                "content_block_start",
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_weather"}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"city\":\"SF\"}"}}"#,
            ),
            (
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":7}}"#,
            ),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);

        assert!(out.contains("\"object\":\"chat.completion.chunk\""));
        assert!(out.contains("\"name\":\"get_weather\""));
        assert!(out.contains("\"arguments\":\"{\\\"city\\\":\\\"SF\\\"}\""));
        assert!(out.contains("\"finish_reason\":\"tool_calls\""));
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }

    #[test]
    fn text_stream_carries_role_once_and_usage() {
        let out = run(&[
            (
                "message_start",
                r#"{"type":"message_start","message":{"id":"msg_2","model":"m","usage":{"input_tokens":3}}}"#,
            ),
            (
                "content_block_delta",
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            ),
            (
                "message_delta",
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            ),
            ("message_stop", r#"{"type":"message_stop"}"#),
        ]);
        assert_eq!(out.matches("\"role\":\"assistant\"").count(), 1);
        assert!(out.contains("\"content\":\"Hi\""));
        assert!(out.contains("\"finish_reason\":\"stop\""));
        assert!(out.contains("\"total_tokens\":5"));
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }

    #[test]
    fn finish_without_message_stop_still_terminates() {
        let out = run(&[(
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"x"}}"#,
        )]);
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }
}
