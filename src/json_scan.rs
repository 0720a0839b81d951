//! Byte-level JSON extent scanning.
//!
//! These helpers only find where a JSON container ends; validity is left to
//! `serde_json`.

#[inline]
pub(crate) fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    let len = bytes.len();
    while i < len {
        match bytes[i] {
            b' ' | b'\n' | b'\r' | b'\t' => i += 1,
            _ => break,
        }
    }
    i
}

/// Exclusive end of the object or array opening at `start`.
///
/// Brackets inside string literals are ignored. Returns `None` when `start`
/// is not an opener, the nesting is inconsistent, or the input ends first.
pub(crate) fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let first = *bytes.get(start)?;
    if first != b'{' && first != b'[' {
        return None;
    }

    let mut stack: smallvec::SmallVec<[u8; 8]> = smallvec::SmallVec::new();
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i = string_end(bytes, i)?;
                continue;
            }
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            closer @ (b'}' | b']') => {
                if stack.pop() != Some(closer) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Exclusive end of the string literal opening at `start`.
#[inline]
fn string_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some(i + 1),
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    None
}
