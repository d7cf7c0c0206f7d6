use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Value, json};

use nextrouter_protocol::sse::SseEvent;

use crate::chunks::ChatChunkEmitter;
use crate::dispatch::SseTransform;
use crate::util::{openai_usage, str_field, u64_field};

/// OpenAI Responses SSE → chat-completion chunks
/// (`sse_parse openai_responses_to_openai_chat_chunks`).
///
/// Terminal bookkeeping (`response.completed` and friends) is only
/// staged: some gateways emit `response.completed` before the last text
/// delta, so the finish chunk and the `[DONE]` terminator are deferred to
/// the end of input.
pub struct ResponsesToChatChunks {
    emitter: ChatChunkEmitter,
    /// Responses item id → OpenAI tool-call index.
    tool_items: BTreeMap<String, i64>,
    next_tool_index: i64,
    saw_text: bool,
    saw_tool_call: bool,
    usage: Option<Value>,
    finish_reason: Option<&'static str>,
    finish_emitted: bool,
}

impl ResponsesToChatChunks {
    pub fn new(model_hint: &str) -> Self {
        Self {
            emitter: ChatChunkEmitter::new(model_hint),
            tool_items: BTreeMap::new(),
            next_tool_index: 0,
            saw_text: false,
            saw_tool_call: false,
            usage: None,
            finish_reason: None,
            finish_emitted: false,
        }
    }

    fn stash_terminal(&mut self, payload: &Value, default_reason: &'static str) {
        let response = payload.get("response").cloned().unwrap_or(json!({}));
        if let Some(id) = str_field(&response, "id") {
            self.emitter.adopt_id(id);
        }
        if let Some(model) = str_field(&response, "model") {
            self.emitter.adopt_model(model);
        }
        if let Some(usage) = response.get("usage").filter(|v| v.is_object()) {
            let input = u64_field(usage, "input_tokens");
            let output = u64_field(usage, "output_tokens");
            let total = usage
                .get("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(input + output);
            let cached = usage
                .get("input_tokens_details")
                .and_then(|d| d.get("cached_tokens"))
                .and_then(Value::as_u64);
            self.usage = Some(openai_usage(input, output, total, cached));
        }
        let reason = match response
            .get("incomplete_details")
            .and_then(|d| str_field(d, "reason"))
        {
            Some("max_output_tokens") => "length",
            Some("content_filter") => "content_filter",
            _ => default_reason,
        };
        self.finish_reason = Some(reason);
    }

    fn finish_frames(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        if !self.finish_emitted {
            self.finish_emitted = true;
            let mut finish = self.finish_reason.unwrap_or("stop");
            // Tool calls with no text finish as tool_calls regardless of
            // what the terminal event claimed.
            if finish == "stop" && self.saw_tool_call && !self.saw_text {
                finish = "tool_calls";
            }
            out.push(
                self.emitter
                    .chunk(0, json!({}), Some(finish), self.usage.take()),
            );
        }
        out.extend(self.emitter.done());
        out
    }
}

impl SseTransform for ResponsesToChatChunks {
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
            "response.created" | "response.in_progress" => {
                let response = payload.get("response").cloned().unwrap_or(json!({}));
                if let Some(id) = str_field(&response, "id") {
                    self.emitter.adopt_id(id);
                }
                if let Some(model) = str_field(&response, "model") {
                    self.emitter.adopt_model(model);
                }
                Vec::new()
            }
            "response.output_text.delta" => {
                let delta = str_field(&payload, "delta").unwrap_or_default();
                if delta.is_empty() {
                    return Vec::new();
                }
                self.saw_text = true;
                vec![self.emitter.chunk(0, json!({ "content": delta }), None, None)]
            }
            "response.refusal.delta" => {
                let delta = str_field(&payload, "delta").unwrap_or_default();
                if delta.is_empty() {
                    return Vec::new();
                }
                vec![self.emitter.chunk(0, json!({ "refusal": delta }), None, None)]
            }
            "response.output_item.added" => {
                let item = payload.get("item").cloned().unwrap_or(json!({}));
                if str_field(&item, "type") != Some("function_call") {
                    return Vec::new();
                }
                self.saw_tool_call = true;
                let item_id = str_field(&item, "id")
                    .or_else(|| str_field(&item, "call_id"))
                    .unwrap_or_default()
                    .to_string();
                let tool_index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_items.insert(item_id, tool_index);
                let delta = json!({
                    "tool_calls": [{
                        "index": tool_index,
                        "id": item
                            .get("call_id")
                            .or_else(|| item.get("id"))
                            .cloned()
                            .unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": item.get("name").cloned().unwrap_or_default(),
                            "arguments": "",
                        }
                    }]
                });
                vec![self.emitter.chunk(0, delta, None, None)]
            }
            "response.function_call_arguments.delta" => {
                let item_id = str_field(&payload, "item_id").unwrap_or_default();
                let tool_index = self.tool_items.get(item_id).copied().unwrap_or(0);
                let partial = str_field(&payload, "delta").unwrap_or_default();
                let delta = json!({
                    "tool_calls": [{
                        "index": tool_index,
                        "function": { "arguments": partial },
                    }]
                });
                vec![self.emitter.chunk(0, delta, None, None)]
            }
            "response.completed" => {
                self.stash_terminal(&payload, "stop");
                Vec::new()
            }
            "response.incomplete" => {
                self.stash_terminal(&payload, "length");
                Vec::new()
            }
            "response.failed" => {
                self.stash_terminal(&payload, "stop");
                Vec::new()
            }
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

    fn run(payloads: &[&str]) -> String {
        let mut transform = ResponsesToChatChunks::new("gpt-test");
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
    fn completed_before_delta_keeps_content_before_done() {
        let out = run(&[
            r#"{"type":"response.created","response":{"id":"resp_1","model":"gpt-test"}}"#,
            r#"{"type":"response.completed","response":{"id":"resp_1","usage":{"input_tokens":2,"output_tokens":1,"total_tokens":3}}}"#,
            r#"{"type":"response.output_text.delta","delta":"hi"}"#,
        ]);
        let content = out.find("\"content\":\"hi\"").expect("content chunk present");
        let done = out.find("data: [DONE]").expect("terminator present");
        assert!(content < done, "delta must precede the terminator");
        assert_eq!(out.matches("data: [DONE]").count(), 1);
        assert!(out.contains("\"finish_reason\":\"stop\""));
        assert!(out.contains("\"total_tokens\":3"));
    }

    #[test]
    fn function_call_stream() {
        let out = run(&[
            r#"{"type":"response.output_item.added","item":{"type":"function_call","id":"fc_1","call_id":"call_1","name":"f"}}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"{\"a\":"}"#,
            r#"{"type":"response.function_call_arguments.delta","item_id":"fc_1","delta":"1}"}"#,
            r#"{"type":"response.completed","response":{}}"#,
        ]);
        assert!(out.contains("\"name\":\"f\""));
        assert!(out.contains("\"arguments\":\"\""));
        assert!(out.contains("\"arguments\":\"{\\\"a\\\":\""));
        assert!(out.contains("\"finish_reason\":\"tool_calls\""));
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }

    #[test]
    fn upstream_done_passthrough_terminates_once() {
        let out = run(&[
            r#"{"type":"response.output_text.delta","delta":"x"}"#,
            "[DONE]",
        ]);
        assert_eq!(out.matches("data: [DONE]").count(), 1);
    }
}
