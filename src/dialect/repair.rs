//! Argument repair ladder shared by every dialect.
//!
//! 1. strict JSON (optionally after trimming to the outermost `{ ... }` span)
//! 2. close an unterminated object (open strings, arrays and objects)
//! 3. regex key/value scraping with opportunistic typing
//!
//! Nested objects are not reconstructed by the scraper: their inner pairs are
//! scraped as if they were top-level keys. Anything the ladder cannot recover
//! yields `None` and the caller drops the call.

use std::sync::LazyLock;

use regex_lite::Regex;
use serde_json::Value;
use smallvec::SmallVec;

use super::ArgumentMap;

/// Which rung of the ladder produced the arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairTier {
    Strict,
    Closed,
    Scraped,
}

static KV_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#""(\w+)"\s*:\s*(?:"((?:[^"\\]|\\.)*)"|\[([^\]]*)\]|([\w.+/\-]+))"#).ok()
});

/// Recover an argument object from possibly malformed text.
#[must_use]
pub fn repair_arguments(raw: &str) -> Option<(ArgumentMap, RepairTier)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(map) = parse_object_strict(trimmed) {
        return Some((map, RepairTier::Strict));
    }
    if let Some(map) = parse_object_closed(trimmed) {
        return Some((map, RepairTier::Closed));
    }

    let scraped = scrape_key_values(trimmed);
    if scraped.is_empty() {
        tracing::debug!(len = trimmed.len(), "argument repair recovered nothing");
        None
    } else {
        Some((scraped, RepairTier::Scraped))
    }
}

/// Strict parse, retried on the outermost `{ ... }` span.
#[must_use]
pub fn parse_object_strict(text: &str) -> Option<ArgumentMap> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    let span = object_span(text)?;
    if span.len() == text.len() {
        return None;
    }
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Parse after appending whatever closers an unterminated object needs.
#[must_use]
pub fn parse_object_closed(text: &str) -> Option<ArgumentMap> {
    let start = text.find('{')?;
    let closed = close_unterminated(&text[start..])?;
    match serde_json::from_str::<Value>(&closed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// First `{` through last `}`.
fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Append the closers a truncated JSON document is missing.
///
/// Returns `None` when nothing is open or the nesting is inconsistent.
fn close_unterminated(text: &str) -> Option<String> {
    let mut stack: SmallVec<[u8; 8]> = SmallVec::new();
    let mut in_string = false;
    let mut escaped = false;

    for &b in text.as_bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.last() != Some(&b) {
                    return None;
                }
                stack.pop();
            }
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut out = String::with_capacity(text.len() + stack.len() + 1);
    out.push_str(text);
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    let kept = out.trim_end().trim_end_matches(',').len();
    out.truncate(kept);
    if out.ends_with(':') {
        return None;
    }
    for closer in stack.iter().rev() {
        out.push(char::from(*closer));
    }
    Some(out)
}

/// Last-resort `"key": value` scraper.
#[must_use]
pub fn scrape_key_values(text: &str) -> ArgumentMap {
    let mut map = ArgumentMap::new();
    let Some(pattern) = KV_PATTERN.as_ref() else {
        return map;
    };

    for caps in pattern.captures_iter(text) {
        let Some(key) = caps.get(1) else {
            continue;
        };
        let value = if let Some(quoted) = caps.get(2) {
            Value::String(unescape_json_string(quoted.as_str()))
        } else if let Some(items) = caps.get(3) {
            scrape_array(items.as_str())
        } else if let Some(bare) = caps.get(4) {
            type_bare_value(bare.as_str())
        } else {
            continue;
        };
        map.insert(key.as_str().to_string(), value);
    }
    map
}

fn unescape_json_string(raw: &str) -> String {
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('"');
    quoted.push_str(raw);
    quoted.push('"');
    serde_json::from_str::<String>(&quoted).unwrap_or_else(|_| raw.to_string())
}

fn scrape_array(items: &str) -> Value {
    let mut wrapped = String::with_capacity(items.len() + 2);
    wrapped.push('[');
    wrapped.push_str(items);
    wrapped.push(']');
    if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(&wrapped) {
        return parsed;
    }
    Value::Array(
        items
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\''))
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.to_string()))
            .collect(),
    )
}

fn type_bare_value(bare: &str) -> Value {
    match bare {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if let Ok(int) = bare.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = bare.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(bare.to_string())
}
