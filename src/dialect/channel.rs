/// Channel dialect parser (multi-channel harmony text).
///
/// Output is a sequence of segments such as
/// `<|channel|>analysis<|message|>...<|end|>` and
/// `<|start|>assistant<|channel|>final<|message|>...`. Tool calls are
/// segments addressed with `to=functions.NAME`, optionally carrying a
/// content-type hint (` json` or `<|constrain|>json`) before `<|message|>`.
///
/// Key invariants:
/// - Only the `final` channel is user-visible; `analysis` and `commentary`
///   are never returned as display text.
/// - Display text never contains special `<|...|>` tokens.
use std::sync::LazyLock;

use memchr::memmem;
use regex_lite::Regex;

use super::repair::repair_arguments;
use super::{dedup_calls, function_name_len, ParseOutcome, ToolCallRecord};
use crate::json_scan::balanced_end;

const CHANNEL: &str = "<|channel|>";
const START: &str = "<|start|>";
const MESSAGE: &str = "<|message|>";
const RECIPIENT_PREFIX: &str = "to=functions.";
/// Tokens that end a message payload.
const PAYLOAD_TERMINATORS: &[&str] = &["<|call|>", "<|end|>", "<|return|>", START, CHANNEL];

static SPECIAL_TOKENS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"<\|(?:start|constrain)\|>\w*|<\|[a-z_]+\|>").ok()
});
static BLANK_RUNS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n+").ok());

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// Parse every `to=functions.NAME` segment in `text`.
#[must_use]
pub fn parse_tool_calls(text: &str) -> ParseOutcome {
    let bytes = text.as_bytes();
    let recipients: Vec<usize> =
        memmem::find_iter(bytes, RECIPIENT_PREFIX.as_bytes()).collect();
    let mut calls = Vec::with_capacity(recipients.len());

    for (i, &pos) in recipients.iter().enumerate() {
        let name_start = pos + RECIPIENT_PREFIX.len();
        let name_len = function_name_len(&bytes[name_start..]);
        if name_len == 0 {
            continue;
        }
        let name = &text[name_start..name_start + name_len];
        let header_start = name_start + name_len;
        let limit = recipients.get(i + 1).copied().unwrap_or(text.len());

        let Some(payload) = call_payload(text, header_start, limit) else {
            tracing::debug!(dialect = "channel", name, "call segment without payload");
            continue;
        };
        match repair_arguments(payload) {
            Some((arguments, _)) => calls.push(ToolCallRecord::new(name, arguments)),
            None => tracing::warn!(
                dialect = "channel",
                name,
                "dropping tool call with unrecoverable arguments"
            ),
        }
    }
    ParseOutcome::from_calls(dedup_calls(calls))
}

/// Payload of the call whose header starts at `header_start`.
///
/// Prefers `<|message|>` framing; without it falls back to the first JSON
/// object after the recipient.
fn call_payload(text: &str, header_start: usize, limit: usize) -> Option<&str> {
    let window = &text[header_start..limit];
    if let Some(rel) = window.find(MESSAGE) {
        let payload_start = header_start + rel + MESSAGE.len();
        let payload_end = payload_end(text, payload_start);
        let payload = text[payload_start..payload_end].trim();
        return (!payload.is_empty()).then_some(payload);
    }

    let brace = header_start + window.find('{')?;
    let end = balanced_end(text.as_bytes(), brace).unwrap_or_else(|| payload_end(text, brace));
    Some(text[brace..end].trim())
}

fn payload_end(text: &str, start: usize) -> usize {
    let rest = text[start..].as_bytes();
    PAYLOAD_TERMINATORS
        .iter()
        .filter_map(|token| memmem::find(rest, token.as_bytes()))
        .min()
        .map_or(text.len(), |rel| start + rel)
}

// ---------------------------------------------------------------------------
// Display text
// ---------------------------------------------------------------------------

struct Segment<'a> {
    channel: &'a str,
    content: &'a str,
}

fn segments(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    for pos in memmem::find_iter(bytes, CHANNEL.as_bytes()) {
        let header_start = pos + CHANNEL.len();
        let Some(message_rel) = memmem::find(&bytes[header_start..], MESSAGE.as_bytes()) else {
            continue;
        };
        let header = &text[header_start..header_start + message_rel];
        // A header may carry `<|constrain|>`, but never crosses into another segment.
        if PAYLOAD_TERMINATORS.iter().any(|token| header.contains(token)) {
            continue;
        }
        let content_start = header_start + message_rel + MESSAGE.len();
        let content_end = payload_end(text, content_start);
        out.push(Segment {
            channel: channel_name(header),
            content: &text[content_start..content_end],
        });
    }
    out
}

/// First word of a segment header, cut before any content-type hint.
fn channel_name(header: &str) -> &str {
    let end = header
        .find(|c: char| c.is_whitespace() || c == '<')
        .unwrap_or(header.len());
    &header[..end]
}

/// User-visible text of a channel-framed response.
///
/// Returns the first `final` segment stripped of special tokens, `""` when
/// only internal segments exist, and `text` with every special token removed
/// when there are no segments at all.
#[must_use]
pub fn extract_final_channel(text: &str) -> String {
    let segments = segments(text);
    if segments.is_empty() {
        if !text.contains("<|") {
            return text.to_string();
        }
        return normalize_whitespace(&strip_special_tokens(text));
    }

    segments
        .iter()
        .find(|segment| segment.channel == "final")
        .map(|segment| strip_special_tokens(segment.content).trim().to_string())
        .unwrap_or_default()
}

fn strip_special_tokens(text: &str) -> String {
    match SPECIAL_TOKENS.as_ref() {
        Some(pattern) => pattern.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

fn normalize_whitespace(text: &str) -> String {
    let collapsed = match BLANK_RUNS.as_ref() {
        Some(pattern) => pattern.replace_all(text, "\n\n").into_owned(),
        None => text.to_string(),
    };
    collapsed.trim().to_string()
}
