/// Tag dialect parser (`<tool_call> ... </tool_call>`).
///
/// Two payload forms are accepted inside a block:
/// - JSON: `{"name": "f", "arguments": {...}}` (`arguments` may also be a
///   JSON-encoded string, `parameters` is accepted as an alias)
/// - function/parameter tags:
///   `<function=f><parameter=key>value</parameter></function>`
///
/// A block missing its opening `<tool_call>` is recovered from the
/// `<function=` start and the closing-tag anchor.
use std::ops::Range;

use memchr::memmem;
use serde_json::Value;

use super::repair::{parse_object_closed, parse_object_strict, repair_arguments};
use super::{dedup_calls, ArgumentMap, ParseOutcome, ToolCallRecord};

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const FUNCTION_OPEN: &str = "<function=";
const FUNCTION_CLOSE: &str = "</function>";
const PARAMETER_OPEN: &str = "<parameter=";
const PARAMETER_CLOSE: &str = "</parameter>";

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Parse every tool-call block in `text`.
#[must_use]
pub fn parse_tool_calls(text: &str) -> ParseOutcome {
    let mut calls = Vec::with_capacity(2);
    for block in find_call_blocks(text) {
        let body = &text[block.body];
        match parse_block(body) {
            Some(call) => calls.push(call),
            None => tracing::warn!(
                dialect = "tag",
                body_len = body.len(),
                "dropping tool call with unrecoverable arguments"
            ),
        }
    }
    ParseOutcome::from_calls(dedup_calls(calls))
}

/// `text` with every tool-call block removed, trimmed.
#[must_use]
pub fn strip_tool_markup(text: &str) -> String {
    let blocks = find_call_blocks(text);
    if blocks.is_empty() {
        return text.trim().to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for block in blocks {
        out.push_str(&text[cursor..block.outer.start]);
        cursor = block.outer.end;
    }
    out.push_str(&text[cursor..]);
    out.trim().to_string()
}

// ---------------------------------------------------------------------------
// Block location
// ---------------------------------------------------------------------------

struct CallBlock {
    /// Whole block including tags.
    outer: Range<usize>,
    /// Payload between the tags.
    body: Range<usize>,
}

fn find_call_blocks(text: &str) -> Vec<CallBlock> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let rest = &bytes[cursor..];
        let open = memmem::find(rest, TOOL_CALL_OPEN.as_bytes());
        let bare = memmem::find(rest, FUNCTION_OPEN.as_bytes());

        let block = match (open, bare) {
            (Some(o), Some(b)) if b < o => bare_function_block(text, cursor + b),
            (Some(o), _) => wrapped_block(text, cursor + o),
            (None, Some(b)) => bare_function_block(text, cursor + b),
            (None, None) => break,
        };
        cursor = block.outer.end.max(cursor + 1);
        blocks.push(block);
    }
    blocks
}

/// `<tool_call>body</tool_call>`; an unclosed block runs to the end of text.
fn wrapped_block(text: &str, start: usize) -> CallBlock {
    let body_start = start + TOOL_CALL_OPEN.len();
    match memmem::find(&text.as_bytes()[body_start..], TOOL_CALL_CLOSE.as_bytes()) {
        Some(rel) => CallBlock {
            outer: start..body_start + rel + TOOL_CALL_CLOSE.len(),
            body: body_start..body_start + rel,
        },
        None => CallBlock {
            outer: start..text.len(),
            body: body_start..text.len(),
        },
    }
}

/// `<function=...>...` without its opening `<tool_call>`.
///
/// Ends after `</function>` (plus a trailing `</tool_call>` if one follows),
/// else at the first `</tool_call>`, else at the end of text.
fn bare_function_block(text: &str, start: usize) -> CallBlock {
    let bytes = &text.as_bytes()[start..];
    let function_close = memmem::find(bytes, FUNCTION_CLOSE.as_bytes());
    let tool_call_close = memmem::find(bytes, TOOL_CALL_CLOSE.as_bytes());

    match (function_close, tool_call_close) {
        (Some(f), t) if t.map_or(true, |t| f < t) => {
            let body_end = start + f + FUNCTION_CLOSE.len();
            let rest = &text[body_end..];
            let skipped = rest.len() - rest.trim_start().len();
            let outer_end = if rest.trim_start().starts_with(TOOL_CALL_CLOSE) {
                body_end + skipped + TOOL_CALL_CLOSE.len()
            } else {
                body_end
            };
            CallBlock {
                outer: start..outer_end,
                body: start..body_end,
            }
        }
        (_, Some(t)) => CallBlock {
            outer: start..start + t + TOOL_CALL_CLOSE.len(),
            body: start..start + t,
        },
        _ => CallBlock {
            outer: start..text.len(),
            body: start..text.len(),
        },
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

fn parse_block(body: &str) -> Option<ToolCallRecord> {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return parse_json_payload(trimmed);
    }
    if let Some(pos) = trimmed.find(FUNCTION_OPEN) {
        return parse_function_payload(&trimmed[pos..]);
    }
    None
}

fn parse_json_payload(payload: &str) -> Option<ToolCallRecord> {
    let object = parse_object_strict(payload).or_else(|| parse_object_closed(payload));
    if let Some(mut object) = object {
        let name = match object.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return None,
        };
        let arguments = object
            .remove("arguments")
            .or_else(|| object.remove("parameters"))
            .and_then(arguments_from_value)?;
        let id = match object.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        };
        return non_empty_record(id, name, arguments);
    }

    // Broken envelope: pull the name out and repair whatever follows "arguments".
    let name = scrape_string_field(payload, "name")?;
    let args_start = find_field_value_start(payload, "arguments")
        .or_else(|| find_field_value_start(payload, "parameters"))?;
    let (arguments, _) = repair_arguments(&payload[args_start..])?;
    non_empty_record(None, name, arguments)
}

fn arguments_from_value(value: Value) -> Option<ArgumentMap> {
    match value {
        Value::Object(map) => Some(map),
        Value::String(encoded) => repair_arguments(&encoded).map(|(map, _)| map),
        _ => None,
    }
}

fn parse_function_payload(payload: &str) -> Option<ToolCallRecord> {
    let after_open = &payload[FUNCTION_OPEN.len()..];
    let name_end = after_open.find('>')?;
    let name = after_open[..name_end].trim();
    if name.is_empty() || name.contains('<') {
        return None;
    }
    let inner = &after_open[name_end + 1..];
    let inner = match inner.find(FUNCTION_CLOSE) {
        Some(end) => &inner[..end],
        None => inner,
    };

    let mut arguments = parse_parameters(inner);
    if arguments.is_empty() {
        // Some templates put a JSON object straight inside <function=...>.
        if let Some((map, _)) = repair_arguments(inner) {
            arguments = map;
        }
    }
    non_empty_record(None, name.to_string(), arguments)
}

fn parse_parameters(inner: &str) -> ArgumentMap {
    let bytes = inner.as_bytes();
    let mut params = ArgumentMap::new();
    let mut cursor = 0usize;

    while let Some(open_rel) = memmem::find(&bytes[cursor..], PARAMETER_OPEN.as_bytes()) {
        let key_start = cursor + open_rel + PARAMETER_OPEN.len();
        let Some(key_end_rel) = memchr::memchr(b'>', &bytes[key_start..]) else {
            break;
        };
        let key = inner[key_start..key_start + key_end_rel].trim();
        let value_start = key_start + key_end_rel + 1;

        // A missing </parameter> ends the value at the next parameter or the end.
        let close = memmem::find(&bytes[value_start..], PARAMETER_CLOSE.as_bytes());
        let next_open = memmem::find(&bytes[value_start..], PARAMETER_OPEN.as_bytes());
        let (value_end, next_cursor) = match (close, next_open) {
            (Some(c), Some(n)) if n < c => (value_start + n, value_start + n),
            (Some(c), _) => (value_start + c, value_start + c + PARAMETER_CLOSE.len()),
            (None, Some(n)) => (value_start + n, value_start + n),
            (None, None) => (inner.len(), inner.len()),
        };

        if !key.is_empty() {
            let value = trim_single_newlines(&inner[value_start..value_end]);
            params.insert(key.to_string(), coerce_json_value(value));
        }
        cursor = next_cursor;
    }
    params
}

/// Strip one leading and one trailing newline, the layout chat templates use.
fn trim_single_newlines(value: &str) -> &str {
    let value = value.strip_prefix('\n').unwrap_or(value);
    value
        .strip_suffix('\n')
        .map_or(value, |v| v.strip_suffix('\r').unwrap_or(v))
}

/// If a value looks like JSON, parse it. Otherwise return it as a JSON string.
fn coerce_json_value(s: &str) -> Value {
    let trimmed = s.trim();
    let looks_json = matches!(
        trimmed.as_bytes().first(),
        Some(b'{' | b'[' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n')
    );
    if looks_json {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            return value;
        }
    }
    Value::String(s.to_string())
}

fn non_empty_record(
    id: Option<String>,
    name: String,
    arguments: ArgumentMap,
) -> Option<ToolCallRecord> {
    if arguments.is_empty() {
        tracing::debug!(dialect = "tag", %name, "dropping tool call with empty arguments");
        return None;
    }
    Some(match id {
        Some(id) => ToolCallRecord::with_id(id, name, arguments),
        None => ToolCallRecord::new(name, arguments),
    })
}

/// Value of `"field": "..."` anywhere in `text`.
fn scrape_string_field(text: &str, field: &str) -> Option<String> {
    let start = find_field_value_start(text, field)?;
    let rest = text[start..].strip_prefix('"')?;
    let end = rest.find('"')?;
    let value = rest[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Byte offset just past `"field":` and any whitespace after it.
fn find_field_value_start(text: &str, field: &str) -> Option<usize> {
    let mut quoted = String::with_capacity(field.len() + 2);
    quoted.push('"');
    quoted.push_str(field);
    quoted.push('"');
    let key_end = text.find(&quoted)? + quoted.len();
    let after_key = text[key_end..].trim_start();
    let after_colon = after_key.strip_prefix(':')?.trim_start();
    Some(text.len() - after_colon.len())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "tag_tests.rs"]
mod tests;
