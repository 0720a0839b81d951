use memchr::memmem;
use smallvec::SmallVec;

use super::native::NativeToolCallAssembler;
use super::{BackendFinishReason, RawDelta};
use crate::dialect::{DialectMarker, ParseOutcome, ToolCallRecord};
use crate::protocol::canonical::CanonicalUsage;

// Marker detection and buffering for one in-flight response.
//
// Text passes through immediately unless its tail could be the beginning of
// one of the active dialect's marker literals. Such a tail is held back until
// the next delta decides it. Once a full marker is seen everything from that
// point to the end of the stream is buffered and handed to the dialect parser.
//
// Key invariants:
// - Held-back text is at most `max_marker_len - 1` bytes.
// - A marker split across any number of deltas is still detected.
// - No text is released after a marker is confirmed, except the parser's
//   display residue or the false-positive flush at stream end.

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// State of the transducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransducerState {
    /// Passing text straight through.
    Streaming,
    /// The tail of the text so far matches a marker prefix and is held back.
    Armed,
    /// A marker was confirmed; all further text accumulates.
    Buffering,
    /// Finished or interrupted.
    Done,
}

/// What the emitter should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// User-visible text.
    Emit(String),
    EmitToolCalls(Vec<ToolCallRecord>),
    /// End of response with the backend's finish reason and the last usage seen.
    Finish {
        reason: Option<BackendFinishReason>,
        usage: CanonicalUsage,
    },
    /// The backend stream failed mid-response; `notice` is shown inline.
    Interrupted {
        notice: String,
        usage: CanonicalUsage,
    },
}

pub type Decisions = SmallVec<[Decision; 2]>;

// ---------------------------------------------------------------------------
// Transducer
// ---------------------------------------------------------------------------

pub struct Transducer {
    /// Active dialect markers; `None` disables text-dialect detection.
    marker: Option<&'static DialectMarker>,
    /// First bytes of the marker literals, for the pass-through fast path.
    marker_first_bytes: SmallVec<[u8; 2]>,
    state: TransducerState,
    /// All effective text received since the response began.
    transcript: String,
    /// Bytes of `transcript` already released as `Emit`.
    released: usize,
    native: NativeToolCallAssembler,
    finish_reason: Option<BackendFinishReason>,
    usage: CanonicalUsage,
}

impl Transducer {
    #[must_use]
    pub fn new(marker: Option<&'static DialectMarker>) -> Self {
        let mut marker_first_bytes: SmallVec<[u8; 2]> = SmallVec::new();
        if let Some(marker) = marker {
            for literal in marker.literals {
                if let Some(&first) = literal.as_bytes().first() {
                    if !marker_first_bytes.contains(&first) {
                        marker_first_bytes.push(first);
                    }
                }
            }
        }
        Self {
            marker,
            marker_first_bytes,
            state: TransducerState::Streaming,
            transcript: String::new(),
            released: 0,
            native: NativeToolCallAssembler::new(),
            finish_reason: None,
            usage: CanonicalUsage::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> TransducerState {
        self.state
    }

    /// Consume one backend delta.
    pub fn consume(&mut self, delta: RawDelta) -> Decisions {
        let mut out = Decisions::new();
        if self.state == TransducerState::Done {
            tracing::debug!("delta after end of response ignored");
            return out;
        }

        if let Some(reason) = delta.finish_reason {
            self.finish_reason = Some(reason);
        }
        if let Some(usage) = delta.usage {
            self.usage = usage;
        }
        for fragment in delta.native_tool_calls {
            self.native.push(fragment);
        }

        if self.state == TransducerState::Buffering {
            if let Some(text) = delta.text {
                self.transcript.push_str(&text);
            }
            if let Some(text) = delta.reasoning_text {
                self.transcript.push_str(&text);
            }
            return out;
        }

        let text = match (delta.text, delta.reasoning_text) {
            (Some(text), _) if !text.is_empty() => text,
            (_, Some(reasoning)) => reasoning,
            _ => return out,
        };
        if text.is_empty() {
            return out;
        }
        self.scan(text, &mut out);
        out
    }

    fn scan(&mut self, text: String, out: &mut Decisions) {
        let Some(marker) = self.marker else {
            self.transcript.push_str(&text);
            self.released = self.transcript.len();
            out.push(Decision::Emit(text));
            return;
        };

        // Nothing held and no byte that could start a marker.
        if self.state == TransducerState::Streaming
            && !text.bytes().any(|b| self.marker_first_bytes.contains(&b))
        {
            self.transcript.push_str(&text);
            self.released = self.transcript.len();
            out.push(Decision::Emit(text));
            return;
        }

        self.transcript.push_str(&text);
        let pending = &self.transcript[self.released..];

        if let Some(at) = find_marker(pending, marker.literals) {
            let marker_start = self.released + at;
            if at > 0 {
                out.push(Decision::Emit(
                    self.transcript[self.released..marker_start].to_string(),
                ));
            }
            self.released = marker_start;
            self.state = TransducerState::Buffering;
            tracing::debug!(
                dialect = %marker.dialect,
                offset = marker_start,
                "tool-call marker confirmed, buffering"
            );
            return;
        }

        let held = held_prefix_len(pending, marker.literals, marker.max_marker_len);
        let release_end = self.transcript.len() - held;
        if release_end > self.released {
            out.push(Decision::Emit(
                self.transcript[self.released..release_end].to_string(),
            ));
            self.released = release_end;
        }
        self.state = if held > 0 {
            TransducerState::Armed
        } else {
            TransducerState::Streaming
        };
    }

    /// End of the backend stream.
    pub fn finish(&mut self) -> Decisions {
        let mut out = Decisions::new();
        if self.state == TransducerState::Done {
            return out;
        }
        let native = std::mem::take(&mut self.native);
        let has_native = !native.is_empty();

        match (self.state, self.marker) {
            (TransducerState::Buffering, Some(marker)) if has_native => {
                tracing::debug!(
                    dialect = %marker.dialect,
                    discarded = self.transcript.len() - self.released,
                    "native tool calls take precedence over buffered markup"
                );
            }
            (TransducerState::Buffering, Some(marker)) => {
                let dialect = marker.dialect;
                let unreleased = &self.transcript[self.released..];
                match dialect.parse(&self.transcript) {
                    ParseOutcome::Calls(calls) => {
                        tracing::debug!(%dialect, calls = calls.len(), "parsed buffered tool calls");
                        let residue = dialect.display_residue(unreleased);
                        if !residue.is_empty() {
                            out.push(Decision::Emit(residue));
                        }
                        out.push(Decision::EmitToolCalls(calls));
                    }
                    ParseOutcome::NoCall => {
                        tracing::debug!(%dialect, len = unreleased.len(), "marker was a false positive");
                        let text = dialect.false_positive_text(unreleased);
                        if !text.is_empty() {
                            out.push(Decision::Emit(text));
                        }
                    }
                }
            }
            _ => {
                if self.released < self.transcript.len() {
                    out.push(Decision::Emit(self.transcript[self.released..].to_string()));
                }
            }
        }
        self.released = self.transcript.len();

        if has_native {
            let calls = native.finish();
            if !calls.is_empty() {
                out.push(Decision::EmitToolCalls(calls));
            }
        }

        out.push(Decision::Finish {
            reason: self.finish_reason,
            usage: self.usage,
        });
        self.state = TransducerState::Done;
        out
    }

    /// The backend stream failed before its natural end.
    pub fn interrupt(&mut self, error: &dyn std::fmt::Display) -> Decisions {
        let mut out = Decisions::new();
        if self.state == TransducerState::Done {
            return out;
        }

        if self.state == TransducerState::Buffering {
            tracing::warn!(
                discarded = self.transcript.len() - self.released,
                "stream interrupted while buffering tool-call markup"
            );
        } else if self.released < self.transcript.len() {
            out.push(Decision::Emit(self.transcript[self.released..].to_string()));
        }
        if !self.native.is_empty() {
            tracing::warn!("stream interrupted with partial native tool calls");
        }
        self.released = self.transcript.len();

        out.push(Decision::Interrupted {
            notice: format!("\n[Stream interrupted: {error}]"),
            usage: self.usage,
        });
        self.state = TransducerState::Done;
        out
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Earliest occurrence of any literal in `text`.
fn find_marker(text: &str, literals: &[&str]) -> Option<usize> {
    literals
        .iter()
        .filter_map(|literal| memmem::find(text.as_bytes(), literal.as_bytes()))
        .min()
}

/// Length of the longest suffix of `text` that is a proper prefix of a literal.
///
/// Literals are ASCII, so a matching suffix always starts on a char boundary.
fn held_prefix_len(text: &str, literals: &[&str], max_marker_len: usize) -> usize {
    let bytes = text.as_bytes();
    let longest = max_marker_len.saturating_sub(1).min(bytes.len());
    (1..=longest)
        .rev()
        .find(|&len| {
            let suffix = &bytes[bytes.len() - len..];
            literals
                .iter()
                .any(|literal| literal.len() > len && literal.as_bytes().starts_with(suffix))
        })
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "transducer_tests.rs"]
mod tests;
