use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Value, json};
use time::OffsetDateTime;

use nextrouter_protocol::finish::openai_to_claude;
use nextrouter_protocol::sse::{SseEvent, event_frame};

use crate::dispatch::SseTransform;
use crate::util::{arr_field, str_field, u64_field};

/// OpenAI chat-completion chunks → Claude messages SSE
/// (`sse_parse openai_to_anthropic_chunks`).
///
/// `message_delta`/`message_stop` are deferred to end of input because
/// usage-bearing chunks may trail the finish chunk.
pub struct ChatToClaudeChunks {
    model: String,
    message_id: String,
    started: bool,
    /// Claude content-block index currently open, with its kind.
    open_block: Option<(u64, BlockKind)>,
    next_block_index: u64,
    /// OpenAI tool-call index → Claude block index.
    tool_blocks: BTreeMap<u64, u64>,
    input_tokens: u64,
    output_tokens: u64,
    stop_reason: Option<&'static str>,
    done_sent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Tool,
}

impl ChatToClaudeChunks {
    pub fn new(model_hint: &str) -> Self {
        Self {
            model: model_hint.to_string(),
            message_id: format!("msg_{}", OffsetDateTime::now_utc().unix_timestamp_nanos()),
            started: false,
            open_block: None,
            next_block_index: 0,
            tool_blocks: BTreeMap::new(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
            done_sent: false,
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<Bytes>) {
        if self.started {
            return;
        }
        self.started = true;
        let payload = json!({
            "type": "message_start",
            "message": {
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": Value::Null,
                "usage": { "input_tokens": self.input_tokens, "output_tokens": 0 },
            }
        });
        out.push(event_frame("message_start", &payload.to_string()));
    }

    fn close_block(&mut self, out: &mut Vec<Bytes>) {
        if let Some((index, _)) = self.open_block.take() {
            let payload = json!({ "type": "content_block_stop", "index": index });
            out.push(event_frame("content_block_stop", &payload.to_string()));
        }
    }

    fn open_text_block(&mut self, out: &mut Vec<Bytes>) -> u64 {
        if let Some((index, BlockKind::Text)) = self.open_block {
            return index;
        }
        self.close_block(out);
        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open_block = Some((index, BlockKind::Text));
        let payload = json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "text", "text": "" },
        });
        out.push(event_frame("content_block_start", &payload.to_string()));
        index
    }

    fn tail_frames(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.done_sent {
            return out;
        }
        self.done_sent = true;
        self.ensure_started(&mut out);
        self.close_block(&mut out);
        let delta = json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": self.stop_reason.unwrap_or("end_turn"),
                "stop_sequence": Value::Null,
            },
            "usage": {
                "input_tokens": self.input_tokens,
                "output_tokens": self.output_tokens,
            },
        });
        out.push(event_frame("message_delta", &delta.to_string()));
        out.push(event_frame(
            "message_stop",
            &json!({ "type": "message_stop" }).to_string(),
        ));
        out.push(nextrouter_protocol::sse::done_frame());
        out
    }
}

impl SseTransform for ChatToClaudeChunks {
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
            let input = usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or_else(|| u64_field(usage, "input_tokens"));
            let output = usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or_else(|| u64_field(usage, "output_tokens"));
            if input > 0 {
                self.input_tokens = self.input_tokens.max(input);
            }
            if output > 0 {
                self.output_tokens = self.output_tokens.max(output);
            }
        }

        let mut out = Vec::new();
        for choice in arr_field(&payload, "choices") {
            let delta = choice.get("delta").cloned().unwrap_or(json!({}));

            if let Some(text) = str_field(&delta, "content")
                && !text.is_empty()
            {
                self.ensure_started(&mut out);
                let index = self.open_text_block(&mut out);
                let payload = json!({
                    "type": "content_block_delta",
                    "index": index,
                    "delta": { "type": "text_delta", "text": text },
                });
                out.push(event_frame("content_block_delta", &payload.to_string()));
            }

            for call in arr_field(&delta, "tool_calls") {
                self.ensure_started(&mut out);
                let tool_index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let function = call.get("function").cloned().unwrap_or(json!({}));

                let block_index = match self.tool_blocks.get(&tool_index).copied() {
                    Some(index) => index,
                    None => {
                        self.close_block(&mut out);
                        let index = self.next_block_index;
                        self.next_block_index += 1;
                        self.tool_blocks.insert(tool_index, index);
                        self.open_block = Some((index, BlockKind::Tool));
                        let start = json!({
                            "type": "content_block_start",
                            "index": index,
                            "content_block": {
                                "type": "tool_use",
                                "id": call
                                    .get("id")
                                    .cloned()
                                    .unwrap_or_else(|| json!(format!("toolu_{tool_index}"))),
                                "name": function.get("name").cloned().unwrap_or_default(),
                                "input": {},
                            },
                        });
                        out.push(event_frame("content_block_start", &start.to_string()));
                        index
                    }
                };

                if let Some(arguments) = str_field(&function, "arguments")
                    && !arguments.is_empty()
                {
                    let payload = json!({
                        "type": "content_block_delta",
                        "index": block_index,
                        "delta": { "type": "input_json_delta", "partial_json": arguments },
                    });
                    out.push(event_frame("content_block_delta", &payload.to_string()));
                }
            }

            if let Some(reason) = str_field(choice, "finish_reason") {
                self.stop_reason = Some(openai_to_claude(reason));
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<Bytes> {
        self.tail_frames()
    }
}
