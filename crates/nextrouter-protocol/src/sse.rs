use bytes::Bytes;

/// One server-sent event: the lines between two blank lines.
///
/// `data` is the concatenation of all `data:` line values joined with `\n`.
/// `other_lines` keeps every non-`data:` line verbatim (including
/// `event: …`, `id: …` and comment lines) so an event can be re-emitted
/// with only its payload replaced.
#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub had_data: bool,
    pub other_lines: Vec<String>,
}

impl SseEvent {
    pub fn is_done(&self) -> bool {
        self.data == "[DONE]"
    }

    /// Re-encode the event, replacing the payload with `payload` while
    /// keeping non-data lines in their original order.
    pub fn encode_with_data(&self, payload: &str) -> Bytes {
        let mut out = String::new();
        for line in &self.other_lines {
            out.push_str(line);
            out.push('\n');
        }
        for part in payload.split('\n') {
            out.push_str("data: ");
            out.push_str(part);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }

    /// Re-encode the event exactly as it was parsed.
    pub fn encode(&self) -> Bytes {
        if self.had_data {
            self.encode_with_data(&self.data)
        } else {
            let mut out = String::new();
            for line in &self.other_lines {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
            Bytes::from(out)
        }
    }
}

/// Incremental SSE decoder. Feed raw bytes, get completed events.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
    other_lines: Vec<String>,
    had_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.push_str(&String::from_utf8_lossy(chunk))
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);

            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                self.finish_event(&mut events);
                continue;
            }

            self.take_line(line);
        }

        events
    }

    /// Flush any trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            if !line.is_empty() {
                self.take_line(line);
            }
        }
        self.finish_event(&mut events);
        events
    }

    fn take_line(&mut self, line: String) {
        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
            self.had_data = true;
            return;
        }
        if line == "data" {
            self.data_lines.push(String::new());
            self.had_data = true;
            return;
        }
        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        }
        self.other_lines.push(line);
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if !self.had_data && self.other_lines.is_empty() {
            return;
        }
        events.push(SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            had_data: self.had_data,
            other_lines: std::mem::take(&mut self.other_lines),
        });
        self.data_lines.clear();
        self.had_data = false;
    }
}

pub const DONE_PAYLOAD: &str = "[DONE]";

pub fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {payload}\n\n"))
}

pub fn event_frame(event: &str, payload: &str) -> Bytes {
    Bytes::from(format!("event: {event}\ndata: {payload}\n\n"))
}

pub fn done_frame() -> Bytes {
    data_frame(DONE_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_lines_until_blank() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
    }

    #[test]
    fn split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: hel").is_empty());
        let events = parser.push_str("lo\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "hello");
    }

    #[test]
    fn named_event_preserved() {
        let mut parser = SseParser::new();
        let events = parser.push_str("event: message_start\ndata: {}\n\n");
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].other_lines, vec!["event: message_start"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: tail").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "tail");
    }

    #[test]
    fn done_detection_and_reencode() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data: [DONE]\n\n");
        assert!(events[0].is_done());
        assert_eq!(&events[0].encode()[..], b"data: [DONE]\n\n");
    }

    #[test]
    fn comment_lines_survive_reencode() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\ndata: {\"a\":1}\n\n");
        let encoded = events[0].encode_with_data("{\"a\":2}");
        assert_eq!(&encoded[..], b": keep-alive\ndata: {\"a\":2}\n\n");
    }
}
