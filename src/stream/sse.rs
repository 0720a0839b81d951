/// Server-Sent Events parsing (backend side) and framing (client side).
///
/// The parser buffers partial lines across arbitrary chunk boundaries and
/// yields one [`SseEvent`] per blank-line-terminated frame.
use std::collections::VecDeque;

use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

impl SseEvent {
    /// `true` for the `[DONE]` sentinel that ends a chunk stream.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

// ---------------------------------------------------------------------------
// SseParser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// - `data:` lines append to the pending payload (multi-line joined by `\n`)
/// - `event:` names the pending frame
/// - a blank line dispatches the frame when it carries data
/// - comment lines (`:`) and unknown fields are ignored
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data: String,
    has_data: bool,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return the events it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text, appending completed events to `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut line_start = self.read_offset;
        let scan_from = self.read_offset;

        let newlines: Vec<usize> = memchr_iter(b'\n', &self.buffer.as_bytes()[scan_from..])
            .map(|rel| scan_from + rel)
            .collect();
        for line_end in newlines {
            let line = self.buffer[line_start..line_end].to_string();
            self.process_line(line.strip_suffix('\r').unwrap_or(&line), out);
            line_start = line_end + 1;
        }

        self.read_offset = line_start;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= 8 * 1024 || self.read_offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                out.push(SseEvent {
                    event: self.event_type.take(),
                    data: std::mem::take(&mut self.data),
                });
                self.has_data = false;
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if self.has_data {
                self.data.push('\n');
            }
            self.has_data = true;
            self.data.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            self.event_type = Some(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Terminal frame of a chunk-protocol stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// `data: {json}\n\n`
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

/// `event: {name}\ndata: {json}\n\n`
#[must_use]
pub fn named_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(16 + event_type.len() + json.len());
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

struct FrameState<S> {
    body: S,
    parser: SseParser,
    remainder: Vec<u8>,
    pending: VecDeque<SseEvent>,
    failed: bool,
}

/// Split an HTTP body into SSE events.
///
/// Multi-byte characters split across chunks are carried over. A transport
/// error is yielded once and ends the stream.
pub fn sse_event_stream<S, E>(body: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + Unpin + 'static,
    E: Send + 'static,
{
    let state = FrameState {
        body,
        parser: SseParser::new(),
        remainder: Vec::new(),
        pending: VecDeque::new(),
        failed: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        let mut parsed = Vec::new();
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.failed {
                return None;
            }

            match state.body.next().await? {
                Ok(bytes) => {
                    state.remainder.extend_from_slice(&bytes);
                    let valid_up_to = match std::str::from_utf8(&state.remainder) {
                        Ok(_) => state.remainder.len(),
                        Err(e) => e.valid_up_to(),
                    };
                    let text = std::str::from_utf8(&state.remainder[..valid_up_to]).unwrap_or("");
                    state.parser.feed_into(text, &mut parsed);
                    state.remainder.drain(..valid_up_to);
                    state.pending.extend(parsed.drain(..));
                }
                Err(e) => {
                    state.failed = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}
