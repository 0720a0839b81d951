pub mod native;
pub mod sse;
pub mod transducer;

pub use native::{NativeToolCallAssembler, NativeToolCallFragment};
pub use sse::{sse_event_stream, SseEvent, SseParser};
pub use transducer::{Decision, Decisions, Transducer, TransducerState};

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use crate::error::DialectifyError;
use crate::protocol::canonical::CanonicalUsage;
use crate::protocol::openai_chat::stream::{decode_backend_chunk_into, parse_backend_chunk};

/// Why the backend says it stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendFinishReason {
    Stop,
    Length,
    ToolCalls,
}

/// One incremental piece of backend output, consumed once and in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDelta {
    pub text: Option<String>,
    /// Reasoning-channel text, used as output only when `text` is absent.
    pub reasoning_text: Option<String>,
    pub native_tool_calls: Vec<NativeToolCallFragment>,
    pub finish_reason: Option<BackendFinishReason>,
    pub usage: Option<CanonicalUsage>,
}

impl RawDelta {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn finish(reason: BackendFinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }
}

/// Ordered, lazily produced backend deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<RawDelta, DialectifyError>> + Send>>;

struct DecodeState<S> {
    events: S,
    pending: VecDeque<RawDelta>,
    finished: bool,
}

/// Decode a stream of backend SSE events into raw deltas.
///
/// `[DONE]` ends the stream. Lines that are not chunk JSON are skipped with a
/// warning; a transport error is passed through once and ends the stream.
pub fn decode_delta_stream<S>(events: S) -> DeltaStream
where
    S: Stream<Item = Result<SseEvent, DialectifyError>> + Send + Unpin + 'static,
{
    let state = DecodeState {
        events,
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(delta) = state.pending.pop_front() {
                return Some((Ok(delta), state));
            }
            if state.finished {
                return None;
            }

            match state.events.next().await {
                None => return None,
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                Some(Ok(event)) if event.is_done() => {
                    state.finished = true;
                }
                Some(Ok(event)) => match parse_backend_chunk(&event.data) {
                    Ok(chunk) => {
                        let mut deltas: SmallVec<[RawDelta; 2]> = SmallVec::new();
                        decode_backend_chunk_into(chunk, &mut deltas);
                        state.pending.extend(deltas);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, len = event.data.len(), "skipping undecodable backend line");
                    }
                },
            }
        }
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &str) -> Result<SseEvent, DialectifyError> {
        Ok(SseEvent {
            event: None,
            data: data.to_string(),
        })
    }

    #[tokio::test]
    async fn decodes_until_done_and_skips_garbage() {
        let events = futures_util::stream::iter(vec![
            event(r#"{"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#),
            event("not json"),
            event(r#"{"choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#),
            event("[DONE]"),
            event(r#"{"choices":[{"index":0,"delta":{"content":"ignored"}}]}"#),
        ]);
        let deltas: Vec<RawDelta> = decode_delta_stream(events)
            .map(|d| d.expect("delta"))
            .collect()
            .await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].text.as_deref(), Some("Hel"));
        assert_eq!(deltas[1].finish_reason, Some(BackendFinishReason::Stop));
    }

    #[tokio::test]
    async fn transport_error_is_surfaced_once() {
        let events = futures_util::stream::iter(vec![
            event(r#"{"choices":[{"index":0,"delta":{"content":"a"}}]}"#),
            Err(DialectifyError::Transport("reset".to_string())),
        ]);
        let items: Vec<_> = decode_delta_stream(events).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(DialectifyError::Transport(_))));
    }
}
