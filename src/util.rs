use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

// Randomly seeded once per process.
static CALL_ID_COUNTER: LazyLock<AtomicU64> =
    LazyLock::new(|| AtomicU64::new(fastrand::u64(..) >> 8));

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Fresh tool-call id: `call_` followed by 16 hex digits.
#[inline]
pub fn next_call_id() -> String {
    let id = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(21);
    out.push_str("call_");
    push_u64_hex_16(&mut out, id);
    out
}

#[inline]
pub(crate) fn next_message_id() -> String {
    random_hex_id("msg_")
}

#[inline]
pub(crate) fn next_chunk_id() -> String {
    random_hex_id("chatcmpl-")
}

fn random_hex_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4();
    let simple = uuid.simple().to_string();
    let mut out = String::with_capacity(prefix.len() + 24);
    out.push_str(prefix);
    out.push_str(&simple[..24]);
    out
}

#[inline]
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    let bytes = value.as_bytes();
    if bytes.iter().all(|&b| b >= 0x20 && b != b'"' && b != b'\\') {
        out.push('"');
        out.push_str(value);
        out.push('"');
        return;
    }

    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c <= '\u{1f}' => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            _ => out.push(ch),
        }
    }
    out.push('"');
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, n: u64) {
    // Writing into a String cannot fail.
    let _ = write!(out, "{n}");
}

#[inline]
pub(crate) fn push_usize_decimal(out: &mut String, n: usize) {
    let _ = write!(out, "{n}");
}

#[inline]
fn push_u64_hex_16(out: &mut String, value: u64) {
    let _ = write!(out, "{value:016x}");
}

#[cfg(test)]
mod tests {
    use super::{next_call_id, next_chunk_id, next_message_id, push_json_string_escaped};

    #[test]
    fn call_ids_are_unique_and_well_formed() {
        let a = next_call_id();
        let b = next_call_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 21);
        assert!(a.starts_with("call_"));
        assert!(a[5..].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn response_ids_carry_protocol_prefixes() {
        let msg = next_message_id();
        assert!(msg.starts_with("msg_"));
        assert_eq!(msg.len(), 28);

        let chunk = next_chunk_id();
        assert!(chunk.starts_with("chatcmpl-"));
        assert_eq!(chunk.len(), 33);
    }

    #[test]
    fn push_json_string_escaped_matches_serde_json() {
        let inputs = [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "mix \"\\\n\t\r\u{0000}",
            "<tool_call>{\"a\":1}</tool_call>",
        ];

        for input in inputs {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            let expected = serde_json::to_string(input).expect("serialize");
            assert_eq!(out, expected);
        }
    }
}
