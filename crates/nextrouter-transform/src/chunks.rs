//! Shared emitter state for transformers whose downstream dialect is
//! OpenAI chat-completion chunks.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::{Value, json};

use nextrouter_protocol::ids::{chat_completion_id, fresh_chat_completion_id, unix_timestamp};
use nextrouter_protocol::sse::{data_frame, done_frame};

pub(crate) struct ChatChunkEmitter {
    id: String,
    model: String,
    created: i64,
    role_sent: BTreeMap<i64, bool>,
    done_sent: bool,
}

impl ChatChunkEmitter {
    pub fn new(model: &str) -> Self {
        Self {
            id: fresh_chat_completion_id(),
            model: model.to_string(),
            created: unix_timestamp(),
            role_sent: BTreeMap::new(),
            done_sent: false,
        }
    }

    /// Adopt the upstream response id/model once they become known.
    pub fn adopt_id(&mut self, upstream: &str) {
        self.id = chat_completion_id(Some(upstream));
    }

    pub fn adopt_model(&mut self, model: &str) {
        if !model.is_empty() {
            self.model = model.to_string();
        }
    }

    /// Encode one chunk; injects `role: "assistant"` into the first delta
    /// per choice index and never again.
    pub fn chunk(
        &mut self,
        choice_index: i64,
        mut delta: Value,
        finish_reason: Option<&str>,
        usage: Option<Value>,
    ) -> Bytes {
        let sent = self.role_sent.entry(choice_index).or_insert(false);
        if !*sent {
            *sent = true;
            if let Some(obj) = delta.as_object_mut() {
                obj.insert("role".to_string(), json!("assistant"));
            }
        }
        let mut body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": choice_index,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        });
        if let Some(usage) = usage
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("usage".to_string(), usage);
        }
        data_frame(&body.to_string())
    }

    /// Chunk with an empty delta carrying only usage.
    pub fn usage_chunk(&mut self, usage: Value) -> Bytes {
        let body = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [],
            "usage": usage,
        });
        data_frame(&body.to_string())
    }

    /// The single terminal frame; subsequent calls return nothing.
    pub fn done(&mut self) -> Option<Bytes> {
        if self.done_sent {
            return None;
        }
        self.done_sent = true;
        Some(done_frame())
    }

    pub fn done_sent(&self) -> bool {
        self.done_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_emitted_once_per_choice() {
        let mut emitter = ChatChunkEmitter::new("m");
        let first = emitter.chunk(0, json!({"content": "a"}), None, None);
        let second = emitter.chunk(0, json!({"content": "b"}), None, None);
        let other = emitter.chunk(1, json!({"content": "c"}), None, None);
        assert!(std::str::from_utf8(&first).unwrap().contains("\"role\""));
        assert!(!std::str::from_utf8(&second).unwrap().contains("\"role\""));
        assert!(std::str::from_utf8(&other).unwrap().contains("\"role\""));
    }

    #[test]
    fn done_is_single() {
        let mut emitter = ChatChunkEmitter::new("m");
        assert!(emitter.done().is_some());
        assert!(emitter.done().is_none());
        assert!(emitter.done_sent());
    }
}
