/// Bracket dialect parser (`[TOOL_CALLS]name[ARGS]{...}`).
///
/// Strict pass first: every marker followed by a name, an optional
/// `[CALL_ID]id`, `[ARGS]` and one complete JSON object (or the array form
/// `[TOOL_CALLS][{"name": ..., "arguments": ...}]`). Only when the strict pass
/// finds nothing does the lenient pass split the text on repeated markers and
/// run each argument tail through the repair ladder.
use memchr::memmem;
use serde_json::Value;

use super::repair::{parse_object_closed, repair_arguments};
use super::{dedup_calls, function_name_len, ArgumentMap, ParseOutcome, ToolCallRecord};
use crate::json_scan::{balanced_end, skip_ws};

const TOOL_CALLS_MARKER: &str = "[TOOL_CALLS]";
const ARGS_MARKER: &str = "[ARGS]";
const CALL_ID_MARKER: &str = "[CALL_ID]";

/// Parse every call in `text`.
#[must_use]
pub fn parse_tool_calls(text: &str) -> ParseOutcome {
    let strict = parse_strict(text);
    let calls = if strict.is_empty() {
        parse_lenient(text)
    } else {
        strict
    };
    ParseOutcome::from_calls(dedup_calls(calls))
}

/// Text preceding the first marker (all of `text` when there is none).
#[must_use]
pub fn text_before_calls(text: &str) -> &str {
    match memmem::find(text.as_bytes(), TOOL_CALLS_MARKER.as_bytes()) {
        Some(pos) => &text[..pos],
        None => text,
    }
}

fn marker_positions(text: &str) -> Vec<usize> {
    memmem::find_iter(text.as_bytes(), TOOL_CALLS_MARKER.as_bytes()).collect()
}

// ---------------------------------------------------------------------------
// Strict pass
// ---------------------------------------------------------------------------

fn parse_strict(text: &str) -> Vec<ToolCallRecord> {
    let mut calls = Vec::new();
    for pos in marker_positions(text) {
        let after = pos + TOOL_CALLS_MARKER.len();
        if text[after..].trim_start().starts_with('[') {
            calls.extend(parse_array_form(text, after));
            continue;
        }
        if let Some(call) = parse_named_strict(text, after) {
            calls.push(call);
        }
    }
    calls
}

/// `name[CALL_ID]id[ARGS]{complete object}` starting at `start`.
fn parse_named_strict(text: &str, start: usize) -> Option<ToolCallRecord> {
    let header = parse_header(text, start)?;
    if !header.saw_args_marker {
        return None;
    }
    let bytes = text.as_bytes();
    let obj_start = skip_ws(bytes, header.args_start);
    if bytes.get(obj_start) != Some(&b'{') {
        return None;
    }
    let obj_end = balanced_end(bytes, obj_start)?;
    let Ok(Value::Object(arguments)) = serde_json::from_str::<Value>(&text[obj_start..obj_end])
    else {
        return None;
    };
    Some(build_record(header.id, header.name, arguments))
}

/// `[{"name": ..., "arguments": ...}, ...]` starting at `start`.
fn parse_array_form(text: &str, start: usize) -> Vec<ToolCallRecord> {
    let bytes = text.as_bytes();
    let array_start = skip_ws(bytes, start);
    let Some(array_end) = balanced_end(bytes, array_start) else {
        return Vec::new();
    };
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&text[array_start..array_end])
    else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| {
            let Value::Object(mut object) = item else {
                return None;
            };
            let name = match object.remove("name") {
                Some(Value::String(name)) if !name.is_empty() => name,
                _ => return None,
            };
            let arguments = match object.remove("arguments") {
                Some(Value::Object(map)) => map,
                Some(Value::String(encoded)) => repair_arguments(&encoded)?.0,
                None => ArgumentMap::new(),
                Some(_) => return None,
            };
            let id = match object.remove("id") {
                Some(Value::String(id)) if !id.is_empty() => Some(id),
                _ => None,
            };
            Some(build_record(id, name, arguments))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Lenient pass
// ---------------------------------------------------------------------------

fn parse_lenient(text: &str) -> Vec<ToolCallRecord> {
    let positions = marker_positions(text);
    let mut calls = Vec::with_capacity(positions.len());

    for (i, &pos) in positions.iter().enumerate() {
        let start = pos + TOOL_CALLS_MARKER.len();
        let end = positions.get(i + 1).copied().unwrap_or(text.len());
        let Some(header) = parse_header(&text[..end], start) else {
            continue;
        };
        let tail = &text[header.args_start..end];
        if !header.saw_args_marker && !tail.trim_start().starts_with('{') {
            continue;
        }
        match repair_arguments(tail) {
            Some((arguments, tier)) => {
                tracing::debug!(dialect = "bracket", name = %header.name, ?tier, "repaired arguments");
                calls.push(build_record(header.id, header.name, arguments));
            }
            None => tracing::warn!(
                dialect = "bracket",
                name = %header.name,
                "dropping tool call with unrecoverable arguments"
            ),
        }
    }

    // Truncated array form: `[TOOL_CALLS][{"name": "f", "arguments": {...`
    if calls.is_empty() {
        for pos in positions {
            let after = pos + TOOL_CALLS_MARKER.len();
            let rest = text[after..].trim_start();
            let Some(inner) = rest.strip_prefix('[') else {
                continue;
            };
            if let Some(mut object) = parse_object_closed(inner) {
                let name = match object.remove("name") {
                    Some(Value::String(name)) if !name.is_empty() => name,
                    _ => continue,
                };
                if let Some(Value::Object(arguments)) = object.remove("arguments") {
                    calls.push(build_record(None, name, arguments));
                }
            }
        }
    }
    calls
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

struct CallHeader {
    name: String,
    id: Option<String>,
    args_start: usize,
    saw_args_marker: bool,
}

/// Parse `name`, optional `[CALL_ID]id` and optional `[ARGS]` from `start`.
fn parse_header(text: &str, start: usize) -> Option<CallHeader> {
    let bytes = text.as_bytes();
    let name_start = skip_ws(bytes, start);
    let name_len = function_name_len(&bytes[name_start..]);
    if name_len == 0 {
        return None;
    }
    let name = text[name_start..name_start + name_len].to_string();
    let mut cursor = name_start + name_len;

    let mut id = None;
    if text[cursor..].starts_with(CALL_ID_MARKER) {
        let id_start = cursor + CALL_ID_MARKER.len();
        let id_len = function_name_len(&bytes[id_start..]);
        if id_len > 0 {
            id = Some(text[id_start..id_start + id_len].to_string());
        }
        cursor = id_start + id_len;
    }

    let saw_args_marker = text[cursor..].starts_with(ARGS_MARKER);
    if saw_args_marker {
        cursor += ARGS_MARKER.len();
    }
    Some(CallHeader {
        name,
        id,
        args_start: cursor,
        saw_args_marker,
    })
}

fn build_record(id: Option<String>, name: String, arguments: ArgumentMap) -> ToolCallRecord {
    match id {
        Some(id) => ToolCallRecord::with_id(id, name, arguments),
        None => ToolCallRecord::new(name, arguments),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calls(text: &str) -> Vec<ToolCallRecord> {
        parse_tool_calls(text).into_calls()
    }

    #[test]
    fn strict_single_call() {
        let parsed = calls(r#"[TOOL_CALLS]search[ARGS]{"q": "weather"}"#);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "search");
        assert_eq!(Value::Object(parsed[0].arguments.clone()), json!({"q": "weather"}));
    }

    #[test]
    fn strict_handles_nested_objects() {
        let parsed = calls(
            r#"[TOOL_CALLS]edit[ARGS]{"file": "a.rs", "range": {"start": 1, "end": 4}}</s>"#,
        );
        assert_eq!(parsed[0].arguments["range"], json!({"start": 1, "end": 4}));
    }

    #[test]
    fn truncated_arguments_are_repaired() {
        let parsed = calls(r#"[TOOL_CALLS]search[ARGS]{"q": "weather""#);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, "search");
        assert_eq!(Value::Object(parsed[0].arguments.clone()), json!({"q": "weather"}));
    }

    #[test]
    fn multiple_strict_calls() {
        let parsed = calls(concat!(
            r#"[TOOL_CALLS]read[ARGS]{"path": "a"}"#,
            r#"[TOOL_CALLS]read[ARGS]{"path": "b"}"#,
        ));
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].arguments["path"], "b");
    }

    #[test]
    fn lenient_split_recovers_every_call_when_one_is_broken() {
        let parsed = calls(concat!(
            r#"[TOOL_CALLS]read[ARGS]{"path": "a", "lines": 10"#,
            r#"[TOOL_CALLS]list[ARGS]{"dir": "src""#,
        ));
        let names: Vec<&str> = parsed.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["read", "list"]);
        assert_eq!(parsed[0].arguments["lines"], 10);
        assert_eq!(parsed[1].arguments["dir"], "src");
    }

    #[test]
    fn duplicate_calls_are_removed() {
        let one = r#"[TOOL_CALLS]read[ARGS]{"path": "a"}"#;
        assert_eq!(calls(&format!("{one}{one}")).len(), 1);
    }

    #[test]
    fn call_id_is_taken_from_text() {
        let parsed = calls(r#"[TOOL_CALLS]read[CALL_ID]abc123XYZ[ARGS]{"path": "a"}"#);
        assert_eq!(parsed[0].id, "abc123XYZ");
    }

    #[test]
    fn array_form() {
        let parsed = calls(
            r#"[TOOL_CALLS][{"name": "a", "arguments": {"x": 1}}, {"name": "b", "arguments": "{\"y\": 2}", "id": "k9"}]"#,
        );
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].arguments["x"], 1);
        assert_eq!(parsed[1].arguments["y"], 2);
        assert_eq!(parsed[1].id, "k9");
    }

    #[test]
    fn truncated_array_form() {
        let parsed = calls(r#"[TOOL_CALLS][{"name": "a", "arguments": {"x": 1"#);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].arguments["x"], 1);
    }

    #[test]
    fn missing_args_marker_with_object_is_accepted_leniently() {
        let parsed = calls(r#"[TOOL_CALLS]ping{"host": "localhost"}"#);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].arguments["host"], "localhost");
    }

    #[test]
    fn unrecoverable_arguments_are_no_call() {
        assert_eq!(parse_tool_calls("[TOOL_CALLS]think[ARGS]maybe later"), ParseOutcome::NoCall);
        assert_eq!(parse_tool_calls("[TOOL_CALLS] and nothing else"), ParseOutcome::NoCall);
    }

    #[test]
    fn text_before_first_marker() {
        assert_eq!(text_before_calls("Sure. [TOOL_CALLS]a[ARGS]{}"), "Sure. ");
        assert_eq!(text_before_calls("plain"), "plain");
    }
}
