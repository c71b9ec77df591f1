//! Incremental Server-Sent Events parsing for streamed completions.
//!
//! Chunks from the HTTP body arrive at arbitrary byte boundaries, so lines
//! are buffered until a newline and events until a blank line.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// The `[DONE]` sentinel that terminates an OpenAI-style stream.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

#[derive(Debug, Default)]
pub struct SseLineParser {
    line: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
}

impl SseLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.line);
                // Multi-byte characters may straddle chunks, so decode per line.
                let line = String::from_utf8_lossy(&raw);
                let line = line.strip_suffix('\r').unwrap_or(&line);
                if let Some(event) = self.process_line(line) {
                    events.push(event);
                }
            } else {
                self.line.push(byte);
            }
        }
        events
    }

    /// Emit a trailing event that was not followed by a blank line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.line.is_empty() {
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.process_line(line.trim_end_matches('\r'));
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event_type = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event_type = None;
            return None;
        }
        Some(SseEvent {
            event_type: self.event_type.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}
