//! Incremental decoder for the `text/event-stream` framing.
//!
//! Stream format:
//! - `event: <name>` sets the event name (default `message`)
//! - `data: <text>` appends a line to the payload; several lines are joined with `\n`
//! - `id:` and `retry:` are tracked, lines starting with `:` are comments (keep-alives)
//! - an empty line dispatches the event
//!
//! Bytes may arrive split at any point, including inside a UTF-8 sequence or
//! between the `\r` and `\n` of a line ending. A line longer than the
//! configured maximum is dropped together with the event it belongs to.

/// One complete server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Longest line kept in memory. A full data set arrives as one `data:`
/// line, so this is generous.
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug)]
pub struct EventParser {
    buffer: Vec<u8>,
    max_line_len: usize,
    /// The rest of the current line is being skipped.
    line_overflowed: bool,
    /// The event in progress is dropped at the next blank line.
    discard_event: bool,
    skip_leading_lf: bool,
    event: Option<String>,
    data: Option<String>,
    last_id: Option<String>,
    retry_ms: Option<u64>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_len,
            line_overflowed: false,
            discard_event: false,
            skip_leading_lf: false,
            event: None,
            data: None,
            last_id: None,
            retry_ms: None,
        }
    }

    /// Feeds a chunk and returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &b in chunk {
            // A '\n' right after '\r' belongs to the same line ending, even
            // when it only shows up in the next chunk.
            if std::mem::take(&mut self.skip_leading_lf) && b == b'\n' {
                continue;
            }
            match b {
                b'\n' => self.finish_line(&mut events),
                b'\r' => {
                    self.finish_line(&mut events);
                    self.skip_leading_lf = true;
                }
                _ => self.push_byte(b),
            }
        }
        events
    }

    fn push_byte(&mut self, b: u8) {
        if self.line_overflowed {
            return;
        }
        if self.buffer.len() >= self.max_line_len {
            tracing::warn!(
                max_line_len = self.max_line_len,
                "dropping oversized stream event"
            );
            self.buffer = Vec::new();
            self.line_overflowed = true;
            self.discard_event = true;
            return;
        }
        self.buffer.push(b);
    }

    /// Reconnect delay last requested by the server, if any.
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    fn finish_line(&mut self, events: &mut Vec<SseEvent>) {
        if std::mem::take(&mut self.line_overflowed) {
            return;
        }
        let raw = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&raw);

        if line.is_empty() {
            if std::mem::take(&mut self.discard_event) {
                self.event = None;
                self.data = None;
                return;
            }
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }
        if self.discard_event {
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.find(':') {
            Some(pos) => {
                let value = &line[pos + 1..];
                (&line[..pos], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (&*line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let name = self.event.take();
        let data = self.data.take()?;
        Some(SseEvent {
            event: name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

impl Default for EventParser {
    fn default() -> Self {
        Self::new()
    }
}
