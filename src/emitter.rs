//! Decisions -> protocol events.
//!
//! [`Emitter`] renders transducer decisions as the ordered event sequence of
//! the client's protocol. [`ResponseCollector`] consumes the same decisions
//! into one materialized response for non-streaming requests.
use serde::Serialize;

use crate::dialect::ToolCallRecord;
use crate::protocol::anthropic::response::encode_messages_response;
use crate::protocol::anthropic::stream::{
    encode_block_stop, encode_message_delta, encode_message_start, encode_message_stop,
    encode_text_block_start, encode_text_delta, encode_tool_input, encode_tool_use_start,
    AnthropicFrame,
};
use crate::protocol::anthropic::AnthropicResponse;
use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage, IngressApi};
use crate::protocol::mapping::resolve_stop_reason;
use crate::protocol::openai_chat::response::encode_chat_response;
use crate::protocol::openai_chat::stream::{
    encode_content_chunk, encode_final_chunk, encode_role_chunk, encode_tool_calls_chunk,
    ChunkHeader,
};
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::stream::sse::{data_frame, named_frame, DONE_FRAME};
use crate::stream::Decision;
use crate::util::{next_chunk_id, next_message_id, unix_now_secs};

/// One serialized protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    /// SSE event name; `None` for chunk-protocol frames.
    pub name: Option<&'static str>,
    /// JSON payload, or `[DONE]`.
    pub data: String,
}

impl OutputEvent {
    fn named((name, data): AnthropicFrame) -> Self {
        Self {
            name: Some(name),
            data,
        }
    }

    fn chunk(data: String) -> Self {
        Self { name: None, data }
    }

    fn done() -> Self {
        Self::chunk("[DONE]".to_string())
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.name.is_none() && self.data == "[DONE]"
    }

    /// SSE wire text of this event.
    #[must_use]
    pub fn to_sse(&self) -> String {
        match self.name {
            Some(name) => named_frame(name, &self.data),
            None if self.data == "[DONE]" => DONE_FRAME.to_string(),
            None => data_frame(&self.data),
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming emitter
// ---------------------------------------------------------------------------

/// Per-response protocol event emitter.
///
/// Block indices increase monotonically and are never reused; a block is
/// always stopped before the next one starts; exactly one terminal event is
/// produced.
#[derive(Debug)]
pub struct Emitter {
    protocol: IngressApi,
    model: String,
    id: String,
    created: u64,
    started: bool,
    finished: bool,
    open_text_block: Option<usize>,
    next_index: usize,
    emitted_tool_calls: bool,
}

impl Emitter {
    #[must_use]
    pub fn new(protocol: IngressApi, model: impl Into<String>) -> Self {
        let id = match protocol {
            IngressApi::Anthropic => next_message_id(),
            IngressApi::OpenAiChat => next_chunk_id(),
        };
        Self {
            protocol,
            model: model.into(),
            id,
            created: unix_now_secs(),
            started: false,
            finished: false,
            open_text_block: None,
            next_index: 0,
            emitted_tool_calls: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn header(&self) -> ChunkHeader<'_> {
        ChunkHeader {
            id: &self.id,
            model: &self.model,
            created: self.created,
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<OutputEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(match self.protocol {
            IngressApi::Anthropic => OutputEvent::named(encode_message_start(&self.id, &self.model)),
            IngressApi::OpenAiChat => OutputEvent::chunk(encode_role_chunk(&self.header())),
        });
    }

    /// The context advisory, as its own text block ahead of model output.
    pub fn advisory_into(&mut self, warning: &str, out: &mut Vec<OutputEvent>) {
        if self.finished {
            return;
        }
        self.ensure_started(out);
        let mut text = String::with_capacity(warning.len() + 2);
        text.push_str(warning);
        text.push_str("\n\n");
        match self.protocol {
            IngressApi::Anthropic => {
                self.stop_text_block(out);
                let index = self.start_text_block(out);
                out.push(OutputEvent::named(encode_text_delta(index, &text)));
                self.stop_text_block(out);
            }
            IngressApi::OpenAiChat => {
                out.push(OutputEvent::chunk(encode_content_chunk(&self.header(), &text)));
            }
        }
    }

    /// The whole response when the backend stream could not be opened.
    pub fn backend_error_into(&mut self, error: &dyn std::fmt::Display, out: &mut Vec<OutputEvent>) {
        self.apply_into(Decision::Emit(format!("[Backend error: {error}]")), out);
        self.apply_into(
            Decision::Finish {
                reason: None,
                usage: CanonicalUsage::default(),
            },
            out,
        );
    }

    /// Render one decision.
    pub fn apply_into(&mut self, decision: Decision, out: &mut Vec<OutputEvent>) {
        if self.finished {
            tracing::debug!("decision after terminal event ignored");
            return;
        }
        match decision {
            Decision::Emit(text) => {
                if text.is_empty() {
                    return;
                }
                self.ensure_started(out);
                self.push_text(&text, out);
            }
            Decision::EmitToolCalls(calls) => {
                if calls.is_empty() {
                    return;
                }
                self.ensure_started(out);
                self.push_tool_calls(&calls, out);
                self.emitted_tool_calls = true;
            }
            Decision::Finish { reason, usage } => {
                self.ensure_started(out);
                let stop = resolve_stop_reason(reason, self.emitted_tool_calls);
                self.push_terminal(stop, &usage, out);
            }
            Decision::Interrupted { notice, usage } => {
                self.ensure_started(out);
                self.push_text(&notice, out);
                self.push_terminal(CanonicalStopReason::EndOfTurn, &usage, out);
            }
        }
    }

    fn push_text(&mut self, text: &str, out: &mut Vec<OutputEvent>) {
        match self.protocol {
            IngressApi::Anthropic => {
                let index = match self.open_text_block {
                    Some(index) => index,
                    None => self.start_text_block(out),
                };
                out.push(OutputEvent::named(encode_text_delta(index, text)));
            }
            IngressApi::OpenAiChat => {
                out.push(OutputEvent::chunk(encode_content_chunk(&self.header(), text)));
            }
        }
    }

    fn push_tool_calls(&mut self, calls: &[ToolCallRecord], out: &mut Vec<OutputEvent>) {
        match self.protocol {
            IngressApi::Anthropic => {
                if self.open_text_block.is_some() {
                    self.stop_text_block(out);
                } else {
                    self.start_text_block(out);
                    self.stop_text_block(out);
                }
                for call in calls {
                    let index = self.next_index;
                    self.next_index += 1;
                    out.push(OutputEvent::named(encode_tool_use_start(index, call)));
                    out.push(OutputEvent::named(encode_tool_input(index, call)));
                    out.push(OutputEvent::named(encode_block_stop(index)));
                }
            }
            IngressApi::OpenAiChat => {
                out.push(OutputEvent::chunk(encode_tool_calls_chunk(&self.header(), calls)));
            }
        }
    }

    fn push_terminal(
        &mut self,
        stop: CanonicalStopReason,
        usage: &CanonicalUsage,
        out: &mut Vec<OutputEvent>,
    ) {
        match self.protocol {
            IngressApi::Anthropic => {
                self.stop_text_block(out);
                out.push(OutputEvent::named(encode_message_delta(stop, usage)));
                out.push(OutputEvent::named(encode_message_stop()));
            }
            IngressApi::OpenAiChat => {
                out.push(OutputEvent::chunk(encode_final_chunk(&self.header(), stop, usage)));
                out.push(OutputEvent::done());
            }
        }
        self.finished = true;
    }

    fn start_text_block(&mut self, out: &mut Vec<OutputEvent>) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.open_text_block = Some(index);
        out.push(OutputEvent::named(encode_text_block_start(index)));
        index
    }

    fn stop_text_block(&mut self, out: &mut Vec<OutputEvent>) {
        if let Some(index) = self.open_text_block.take() {
            out.push(OutputEvent::named(encode_block_stop(index)));
        }
    }
}

// ---------------------------------------------------------------------------
// Non-streaming collector
// ---------------------------------------------------------------------------

/// A complete response in the client's protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CollectedResponse {
    Messages(AnthropicResponse),
    Chat(OpenAiChatResponse),
}

/// Accumulates decisions for a non-streaming response.
#[derive(Debug)]
pub struct ResponseCollector {
    protocol: IngressApi,
    model: String,
    text: String,
    calls: Vec<ToolCallRecord>,
    stop: CanonicalStopReason,
    usage: CanonicalUsage,
}

impl ResponseCollector {
    #[must_use]
    pub fn new(protocol: IngressApi, model: impl Into<String>) -> Self {
        Self {
            protocol,
            model: model.into(),
            text: String::new(),
            calls: Vec::new(),
            stop: CanonicalStopReason::EndOfTurn,
            usage: CanonicalUsage::default(),
        }
    }

    pub fn advisory(&mut self, warning: &str) {
        self.text.push_str(warning);
        self.text.push_str("\n\n");
    }

    pub fn backend_error(&mut self, error: &dyn std::fmt::Display) {
        self.text.push_str(&format!("[Backend error: {error}]"));
    }

    pub fn apply(&mut self, decision: Decision) {
        match decision {
            Decision::Emit(text) => self.text.push_str(&text),
            Decision::EmitToolCalls(calls) => self.calls.extend(calls),
            Decision::Finish { reason, usage } => {
                self.stop = resolve_stop_reason(reason, !self.calls.is_empty());
                self.usage = usage;
            }
            Decision::Interrupted { notice, usage } => {
                self.text.push_str(&notice);
                self.stop = CanonicalStopReason::EndOfTurn;
                self.usage = usage;
            }
        }
    }

    #[must_use]
    pub fn into_response(self) -> CollectedResponse {
        match self.protocol {
            IngressApi::Anthropic => CollectedResponse::Messages(encode_messages_response(
                next_message_id(),
                &self.model,
                self.text,
                self.calls,
                self.stop,
                &self.usage,
            )),
            IngressApi::OpenAiChat => {
                let id = next_chunk_id();
                let header = ChunkHeader {
                    id: &id,
                    model: &self.model,
                    created: unix_now_secs(),
                };
                CollectedResponse::Chat(encode_chat_response(
                    &header,
                    self.text,
                    &self.calls,
                    self.stop,
                    &self.usage,
                ))
            }
        }
    }
}

#[cfg(test)]
#[path = "emitter_tests.rs"]
mod tests;
