//! Incremental parsing for `text/event-stream` bodies.
//!
//! The legacy SSE transport names its events: the first frame on a fresh
//! stream is an `endpoint` event carrying the message-submit URL, and every
//! response afterwards arrives as a `message` event. The parser therefore
//! tracks `event:` fields alongside `data:` lines instead of treating the
//! stream as bare data payloads.

/// A complete server-sent event, assembled from one blank-line-terminated
/// block of fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub name: String,
    pub data: String,
}

impl SseEvent {
    pub const DEFAULT_NAME: &'static str = "message";
}

#[derive(Default)]
pub struct SseEventParser {
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<String>,
}

impl SseEventParser {
    /// Feeds a chunk of bytes and returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        self.drain(false)
    }

    /// Flushes a trailing unterminated event at end of stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        self.drain(true)
    }

    fn drain(&mut self, flush: bool) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..line_end]) {
                let line = text.to_string();
                self.consume_line(&line, &mut events);
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                let line = text.to_string();
                self.consume_line(&line, &mut events);
            }
            self.buffer.clear();
            if let Some(event) = self.take_event() {
                events.push(event);
            }
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        events
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            if let Some(event) = self.take_event() {
                events.push(event);
            }
        } else if let Some(name) = field_value(trimmed, "event") {
            self.event_name = Some(name.to_string());
        } else if let Some(data) = field_value(trimmed, "data") {
            self.data_lines.push(data.to_string());
        }
        // Comment lines (leading ':') and unknown fields are skipped.
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        let name = self
            .event_name
            .take()
            .unwrap_or_else(|| SseEvent::DEFAULT_NAME.to_string());
        if self.data_lines.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseEvent { name, data })
    }
}

fn field_value<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?;
    let rest = rest.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}
