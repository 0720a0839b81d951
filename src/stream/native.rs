//! Assembly of structured tool calls streamed by the backend.
//!
//! Fragments arrive keyed by `index`; the first fragment carrying an id or a
//! name fixes it and argument text is concatenated in arrival order.
use rustc_hash::FxHashMap;

use crate::dialect::repair::repair_arguments;
use crate::dialect::{ArgumentMap, ToolCallRecord};

/// One streamed piece of a backend-native tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct NativeToolCallAssembler {
    partials: FxHashMap<u32, PartialCall>,
}

impl NativeToolCallAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: NativeToolCallFragment) {
        let partial = self.partials.entry(fragment.index).or_default();
        if partial.id.is_none() {
            partial.id = fragment.id.filter(|id| !id.is_empty());
        }
        if partial.name.is_empty() {
            if let Some(name) = fragment.name {
                partial.name = name.trim().to_string();
            }
        }
        if let Some(arguments) = fragment.arguments {
            partial.arguments.push_str(&arguments);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// Completed calls in index order.
    ///
    /// Calls without a name, or whose argument text cannot be recovered as an
    /// object, are dropped.
    #[must_use]
    pub fn finish(self) -> Vec<ToolCallRecord> {
        let mut partials: Vec<(u32, PartialCall)> = self.partials.into_iter().collect();
        partials.sort_unstable_by_key(|(index, _)| *index);

        partials
            .into_iter()
            .filter_map(|(index, partial)| {
                if partial.name.is_empty() {
                    tracing::warn!(index, "dropping native tool call without a name");
                    return None;
                }
                let arguments = if partial.arguments.trim().is_empty() {
                    ArgumentMap::new()
                } else if let Some((map, tier)) = repair_arguments(&partial.arguments) {
                    tracing::trace!(index, ?tier, "assembled native tool call arguments");
                    map
                } else {
                    tracing::warn!(
                        index,
                        name = %partial.name,
                        "dropping native tool call with unrecoverable arguments"
                    );
                    return None;
                };
                Some(match partial.id {
                    Some(id) => ToolCallRecord::with_id(id, partial.name, arguments),
                    None => ToolCallRecord::new(partial.name, arguments),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> NativeToolCallFragment {
        NativeToolCallFragment {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: Some(args.to_string()),
        }
    }

    #[test]
    fn fragments_are_concatenated_per_index() {
        let mut assembler = NativeToolCallAssembler::new();
        assembler.push(fragment(0, Some("call_a"), Some("read"), "{\"pa"));
        assembler.push(fragment(1, Some("call_b"), Some("list"), "{}"));
        assembler.push(fragment(0, None, None, "th\": \"x\"}"));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "read");
        assert_eq!(calls[0].arguments["path"], "x");
        assert_eq!(calls[1].name, "list");
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn missing_id_gets_fresh_one() {
        let mut assembler = NativeToolCallAssembler::new();
        assembler.push(fragment(0, None, Some("ping"), ""));
        let calls = assembler.finish();
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn nameless_and_broken_calls_are_dropped() {
        let mut assembler = NativeToolCallAssembler::new();
        assembler.push(fragment(0, None, None, "{\"a\": 1}"));
        assembler.push(fragment(1, None, Some("f"), "not json"));
        assembler.push(fragment(2, None, Some("g"), "{\"b\": 2"));
        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "g");
        assert_eq!(calls[0].arguments["b"], 2);
    }
}
