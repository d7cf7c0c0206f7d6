use bytes::Bytes;
use serde_json::{Value, json};

use nextrouter_protocol::finish::gemini_to_openai;
use nextrouter_protocol::sse::SseEvent;

use crate::chunks::ChatChunkEmitter;
use crate::dispatch::SseTransform;
use crate::util::{arguments_to_string, arr_field, gemini_usage_counts, openai_usage, str_field};

/// Gemini streamGenerateContent SSE → chat-completion chunks
/// (`sse_parse gemini_to_openai_chat_chunks`).
pub struct GeminiToChatChunks {
    emitter: ChatChunkEmitter,
    next_tool_index: i64,
    usage: Option<Value>,
    finished: bool,
}

impl GeminiToChatChunks {
    pub fn new(model_hint: &str) -> Self {
        Self {
            emitter: ChatChunkEmitter::new(model_hint),
            next_tool_index: 0,
            usage: None,
            finished: false,
        }
    }

    fn tail_frames(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if let Some(usage) = self.usage.take() {
            out.push(self.emitter.usage_chunk(usage));
        }
        out.extend(self.emitter.done());
        out
    }
}

impl SseTransform for GeminiToChatChunks {
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

        if let Some(model) = str_field(&payload, "modelVersion") {
            self.emitter
                .adopt_model(model.strip_prefix("models/").unwrap_or(model));
        }
        if let Some(usage) = payload.get("usageMetadata").filter(|v| v.is_object()) {
            let (input, output, total) = gemini_usage_counts(usage);
            let cached = usage.get("cachedContentTokenCount").and_then(Value::as_u64);
            self.usage = Some(openai_usage(input, output, total, cached));
        }

        let mut out = Vec::new();
        for (idx, candidate) in arr_field(&payload, "candidates").iter().enumerate() {
            let choice_index = candidate
                .get("index")
                .and_then(Value::as_i64)
                .unwrap_or(idx as i64);
            let parts = candidate
                .get("content")
                .map(|content| arr_field(content, "parts"))
                .unwrap_or(&[]);

            for part in parts {
                if let Some(text) = str_field(part, "text")
                    && !text.is_empty()
                {
                    out.push(self.emitter.chunk(
                        choice_index,
                        json!({ "content": text }),
                        None,
                        None,
                    ));
                }
                if let Some(call) = part.get("functionCall") {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    let delta = json!({
                        "tool_calls": [{
                            "index": tool_index,
                            "id": call
                                .get("id")
                                .cloned()
                                .unwrap_or_else(|| json!(format!("call_{tool_index}"))),
                            "type": "function",
                            "function": {
                                "name": call.get("name").cloned().unwrap_or_default(),
                                "arguments": arguments_to_string(
                                    call.get("args").unwrap_or(&Value::Null),
                                ),
                            }
                        }]
                    });
                    out.push(self.emitter.chunk(choice_index, delta, None, None));
                }
            }

            if let Some(reason) = str_field(candidate, "finishReason") {
                self.finished = true;
                out.push(self.emitter.chunk(
                    choice_index,
                    json!({}),
                    Some(gemini_to_openai(reason)),
                    None,
                ));
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        if self.emitter.done_sent() {
            return Vec::new();
        }
        let mut out = Vec::new();
        if !self.finished {
            out.push(self.emitter.chunk(0, json!({}), Some("stop"), None));
        }
        out.extend(self.tail_frames());
        out
    }
}
