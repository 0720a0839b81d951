use smallvec::SmallVec;

use crate::dialect::ToolCallRecord;
use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};
use crate::protocol::mapping::{canonical_stop_to_openai, openai_finish_to_backend};
use crate::stream::native::NativeToolCallFragment;
use crate::stream::RawDelta;
use crate::util::{push_json_string_escaped, push_u64_decimal, push_usize_decimal};

use super::OpenAiStreamChunk;

// ---------------------------------------------------------------------------
// Backend side: chunk -> RawDelta
// ---------------------------------------------------------------------------

/// Parse the JSON payload of one backend `data:` line.
///
/// # Errors
///
/// Returns the `serde_json` error for payloads that are not a chunk object.
pub fn parse_backend_chunk(data: &str) -> Result<OpenAiStreamChunk, serde_json::Error> {
    serde_json::from_str(data)
}

/// Decode a backend chunk into raw deltas, one per choice plus one for a
/// usage-only chunk.
pub fn decode_backend_chunk_into(chunk: OpenAiStreamChunk, out: &mut SmallVec<[RawDelta; 2]>) {
    let usage = chunk.usage.map(|usage| CanonicalUsage {
        input_tokens: Some(usage.prompt_tokens),
        output_tokens: Some(usage.completion_tokens),
    });

    if chunk.choices.is_empty() {
        if usage.is_some() {
            out.push(RawDelta {
                usage,
                ..RawDelta::default()
            });
        }
        return;
    }

    let last = chunk.choices.len() - 1;
    for (i, choice) in chunk.choices.into_iter().enumerate() {
        let delta = choice.delta;
        let native_tool_calls = delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let (name, arguments) = call
                    .function
                    .map(|function| (function.name, function.arguments))
                    .unwrap_or_default();
                NativeToolCallFragment {
                    index: call.index,
                    id: call.id,
                    name,
                    arguments,
                }
            })
            .collect();

        out.push(RawDelta {
            text: delta.content.filter(|text| !text.is_empty()),
            reasoning_text: delta.reasoning_content.filter(|text| !text.is_empty()),
            native_tool_calls,
            finish_reason: choice.finish_reason.as_deref().and_then(openai_finish_to_backend),
            usage: if i == last { usage } else { None },
        });
    }
}

// ---------------------------------------------------------------------------
// Client side: chunk JSON encoding
// ---------------------------------------------------------------------------

/// Fields shared by every chunk of one response.
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader<'a> {
    pub id: &'a str,
    pub model: &'a str,
    pub created: u64,
}

fn push_chunk_prefix(out: &mut String, header: &ChunkHeader<'_>) {
    out.push_str("{\"id\":");
    push_json_string_escaped(out, header.id);
    out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
    push_u64_decimal(out, header.created);
    out.push_str(",\"model\":");
    push_json_string_escaped(out, header.model);
}

/// First chunk: assistant role with empty content.
#[must_use]
pub fn encode_role_chunk(header: &ChunkHeader<'_>) -> String {
    let mut out = String::with_capacity(160 + header.id.len() + header.model.len());
    push_chunk_prefix(&mut out, header);
    out.push_str(
        ",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}",
    );
    out
}

#[must_use]
pub fn encode_content_chunk(header: &ChunkHeader<'_>, text: &str) -> String {
    let mut out = String::with_capacity(128 + header.id.len() + header.model.len() + text.len());
    push_chunk_prefix(&mut out, header);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"content\":");
    push_json_string_escaped(&mut out, text);
    out.push_str("},\"finish_reason\":null}]}");
    out
}

/// One delta carrying every call, each tagged with its position.
#[must_use]
pub fn encode_tool_calls_chunk(header: &ChunkHeader<'_>, calls: &[ToolCallRecord]) -> String {
    let mut out = String::with_capacity(160 + calls.len() * 128);
    push_chunk_prefix(&mut out, header);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[");
    for (index, call) in calls.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push_str("{\"index\":");
        push_usize_decimal(&mut out, index);
        out.push_str(",\"id\":");
        push_json_string_escaped(&mut out, &call.id);
        out.push_str(",\"type\":\"function\",\"function\":{\"name\":");
        push_json_string_escaped(&mut out, &call.name);
        out.push_str(",\"arguments\":");
        push_json_string_escaped(&mut out, &call.arguments_json());
        out.push_str("}}");
    }
    out.push_str("]},\"finish_reason\":null}]}");
    out
}

/// Last chunk: empty delta, finish reason and usage when known.
#[must_use]
pub fn encode_final_chunk(
    header: &ChunkHeader<'_>,
    reason: CanonicalStopReason,
    usage: &CanonicalUsage,
) -> String {
    let mut out = String::with_capacity(224 + header.id.len() + header.model.len());
    push_chunk_prefix(&mut out, header);
    out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":");
    push_json_string_escaped(&mut out, canonical_stop_to_openai(reason));
    out.push_str("}]");
    if !usage.is_empty() {
        out.push_str(",\"usage\":{\"prompt_tokens\":");
        push_u64_decimal(&mut out, usage.input_tokens.unwrap_or(0));
        out.push_str(",\"completion_tokens\":");
        push_u64_decimal(&mut out, usage.output_tokens.unwrap_or(0));
        out.push_str(",\"total_tokens\":");
        push_u64_decimal(&mut out, usage.total_tokens().unwrap_or(0));
        out.push('}');
    }
    out.push('}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::ArgumentMap;
    use crate::stream::BackendFinishReason;
    use serde_json::{json, Value};

    fn decode(data: &str) -> SmallVec<[RawDelta; 2]> {
        let mut out = SmallVec::new();
        decode_backend_chunk_into(parse_backend_chunk(data).expect("chunk"), &mut out);
        out
    }

    const HEADER: ChunkHeader<'static> = ChunkHeader {
        id: "chatcmpl-1",
        model: "qwen3",
        created: 1_700_000_000,
    };

    #[test]
    fn decodes_text_and_reasoning() {
        let deltas = decode(r#"{"choices":[{"index":0,"delta":{"content":"Hi","reasoning_content":"hmm"}}]}"#);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].text.as_deref(), Some("Hi"));
        assert_eq!(deltas[0].reasoning_text.as_deref(), Some("hmm"));
    }

    #[test]
    fn decodes_native_fragments_and_finish() {
        let deltas = decode(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_9","type":"function","function":{"name":"ls","arguments":"{\"d"}}]},"finish_reason":"tool_calls"}]}"#,
        );
        let fragment = &deltas[0].native_tool_calls[0];
        assert_eq!(fragment.index, 1);
        assert_eq!(fragment.id.as_deref(), Some("call_9"));
        assert_eq!(fragment.name.as_deref(), Some("ls"));
        assert_eq!(fragment.arguments.as_deref(), Some("{\"d"));
        assert_eq!(deltas[0].finish_reason, Some(BackendFinishReason::ToolCalls));
    }

    #[test]
    fn usage_only_chunk_becomes_a_delta() {
        let deltas = decode(r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].usage.and_then(|u| u.input_tokens), Some(12));
        assert!(deltas[0].text.is_none());
    }

    #[test]
    fn empty_chunk_yields_nothing() {
        assert!(decode(r#"{"choices":[]}"#).is_empty());
    }

    #[test]
    fn content_chunk_is_valid_json() {
        let value: Value = serde_json::from_str(&encode_content_chunk(&HEADER, "a \"q\"\n"))
            .expect("json");
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "a \"q\"\n");
        assert_eq!(value["choices"][0]["finish_reason"], Value::Null);
    }

    #[test]
    fn role_chunk_opens_with_empty_content() {
        let value: Value = serde_json::from_str(&encode_role_chunk(&HEADER)).expect("json");
        assert_eq!(value["choices"][0]["delta"], json!({"role": "assistant", "content": ""}));
    }

    #[test]
    fn tool_calls_chunk_aggregates_calls() {
        let mut args = ArgumentMap::new();
        args.insert("city".to_string(), json!("Rome"));
        let calls = vec![
            ToolCallRecord::with_id("call_a", "get_weather", args),
            ToolCallRecord::with_id("call_b", "noop", ArgumentMap::new()),
        ];
        let value: Value =
            serde_json::from_str(&encode_tool_calls_chunk(&HEADER, &calls)).expect("json");
        let tool_calls = &value["choices"][0]["delta"]["tool_calls"];
        assert_eq!(tool_calls[0]["index"], 0);
        assert_eq!(tool_calls[0]["id"], "call_a");
        assert_eq!(tool_calls[0]["function"]["arguments"], "{\"city\":\"Rome\"}");
        assert_eq!(tool_calls[1]["index"], 1);
        assert_eq!(tool_calls[1]["function"]["arguments"], "{}");
    }

    #[test]
    fn final_chunk_carries_reason_and_usage() {
        let usage = CanonicalUsage {
            input_tokens: Some(10),
            output_tokens: Some(5),
        };
        let value: Value = serde_json::from_str(&encode_final_chunk(
            &HEADER,
            CanonicalStopReason::ToolCalls,
            &usage,
        ))
        .expect("json");
        assert_eq!(value["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(value["choices"][0]["delta"], json!({}));
        assert_eq!(value["usage"]["total_tokens"], 15);

        let bare: Value = serde_json::from_str(&encode_final_chunk(
            &HEADER,
            CanonicalStopReason::EndOfTurn,
            &CanonicalUsage::default(),
        ))
        .expect("json");
        assert!(bare.get("usage").is_none());
    }
}
