//! Messages API stream frame encoders.
//!
//! Each encoder returns the `(event name, JSON payload)` pair of one frame.
//! Payloads are written by hand on the per-token path and stay byte-compatible
//! with the serde types in the parent module.
use crate::dialect::ToolCallRecord;
use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};
use crate::protocol::mapping::canonical_stop_to_anthropic;
use crate::util::{push_json_string_escaped, push_u64_decimal, push_usize_decimal};

pub type AnthropicFrame = (&'static str, String);

#[must_use]
pub fn encode_message_start(id: &str, model: &str) -> AnthropicFrame {
    let mut json = String::with_capacity(192 + id.len() + model.len());
    json.push_str("{\"type\":\"message_start\",\"message\":{\"id\":");
    push_json_string_escaped(&mut json, id);
    json.push_str(",\"type\":\"message\",\"role\":\"assistant\",\"model\":");
    push_json_string_escaped(&mut json, model);
    json.push_str(
        ",\"content\":[],\"stop_reason\":null,\"stop_sequence\":null,\"usage\":{\"input_tokens\":0,\"output_tokens\":0}}}",
    );
    ("message_start", json)
}

#[must_use]
pub fn encode_text_block_start(index: usize) -> AnthropicFrame {
    let mut json = String::with_capacity(96);
    json.push_str("{\"type\":\"content_block_start\",\"index\":");
    push_usize_decimal(&mut json, index);
    json.push_str(",\"content_block\":{\"type\":\"text\",\"text\":\"\"}}");
    ("content_block_start", json)
}

#[must_use]
pub fn encode_text_delta(index: usize, text: &str) -> AnthropicFrame {
    let mut json = String::with_capacity(80 + text.len());
    json.push_str("{\"type\":\"content_block_delta\",\"index\":");
    push_usize_decimal(&mut json, index);
    json.push_str(",\"delta\":{\"type\":\"text_delta\",\"text\":");
    push_json_string_escaped(&mut json, text);
    json.push_str("}}");
    ("content_block_delta", json)
}

#[must_use]
pub fn encode_block_stop(index: usize) -> AnthropicFrame {
    let mut json = String::with_capacity(48);
    json.push_str("{\"type\":\"content_block_stop\",\"index\":");
    push_usize_decimal(&mut json, index);
    json.push('}');
    ("content_block_stop", json)
}

#[must_use]
pub fn encode_tool_use_start(index: usize, call: &ToolCallRecord) -> AnthropicFrame {
    let mut json = String::with_capacity(112 + call.id.len() + call.name.len());
    json.push_str("{\"type\":\"content_block_start\",\"index\":");
    push_usize_decimal(&mut json, index);
    json.push_str(",\"content_block\":{\"type\":\"tool_use\",\"id\":");
    push_json_string_escaped(&mut json, &call.id);
    json.push_str(",\"name\":");
    push_json_string_escaped(&mut json, &call.name);
    json.push_str(",\"input\":{}}}");
    ("content_block_start", json)
}

/// The complete argument object as one `input_json_delta`.
#[must_use]
pub fn encode_tool_input(index: usize, call: &ToolCallRecord) -> AnthropicFrame {
    let arguments = call.arguments_json();
    let mut json = String::with_capacity(96 + arguments.len());
    json.push_str("{\"type\":\"content_block_delta\",\"index\":");
    push_usize_decimal(&mut json, index);
    json.push_str(",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":");
    push_json_string_escaped(&mut json, &arguments);
    json.push_str("}}");
    ("content_block_delta", json)
}

#[must_use]
pub fn encode_message_delta(reason: CanonicalStopReason, usage: &CanonicalUsage) -> AnthropicFrame {
    let mut json = String::with_capacity(128);
    json.push_str("{\"type\":\"message_delta\",\"delta\":{\"stop_reason\":");
    push_json_string_escaped(&mut json, canonical_stop_to_anthropic(reason));
    json.push_str(",\"stop_sequence\":null},\"usage\":{\"input_tokens\":");
    push_u64_decimal(&mut json, usage.input_tokens.unwrap_or(0));
    json.push_str(",\"output_tokens\":");
    push_u64_decimal(&mut json, usage.output_tokens.unwrap_or(0));
    json.push_str("}}");
    ("message_delta", json)
}

#[must_use]
pub fn encode_message_stop() -> AnthropicFrame {
    ("message_stop", "{\"type\":\"message_stop\"}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::ArgumentMap;
    use crate::protocol::anthropic::{
        AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent, AnthropicUsage,
    };
    use serde_json::json;

    fn parse((name, json): AnthropicFrame) -> AnthropicStreamEvent {
        let event: AnthropicStreamEvent = serde_json::from_str(&json).expect("valid frame");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");
        assert_eq!(value["type"], name);
        event
    }

    #[test]
    fn message_start_reads_back() {
        let AnthropicStreamEvent::MessageStart { message } = parse(encode_message_start("msg_1", "qwen"))
        else {
            panic!("expected message_start");
        };
        assert_eq!(message.id, "msg_1");
        assert_eq!(message.model, "qwen");
        assert!(message.content.is_empty());
    }

    #[test]
    fn text_delta_escapes() {
        assert_eq!(
            parse(encode_text_delta(2, "line\n\"q\"")),
            AnthropicStreamEvent::ContentBlockDelta {
                index: 2,
                delta: AnthropicDelta::TextDelta {
                    text: "line\n\"q\"".to_string()
                },
            }
        );
    }

    #[test]
    fn tool_use_frames() {
        let mut args = ArgumentMap::new();
        args.insert("city".to_string(), json!("Rome"));
        let call = ToolCallRecord::with_id("call_1", "get_weather", args);

        assert_eq!(
            parse(encode_tool_use_start(1, &call)),
            AnthropicStreamEvent::ContentBlockStart {
                index: 1,
                content_block: AnthropicContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: json!({}),
                },
            }
        );
        assert_eq!(
            parse(encode_tool_input(1, &call)),
            AnthropicStreamEvent::ContentBlockDelta {
                index: 1,
                delta: AnthropicDelta::InputJsonDelta {
                    partial_json: "{\"city\":\"Rome\"}".to_string()
                },
            }
        );
    }

    #[test]
    fn message_delta_defaults_unknown_usage_to_zero() {
        let AnthropicStreamEvent::MessageDelta { delta, usage } = parse(encode_message_delta(
            CanonicalStopReason::MaxTokens,
            &CanonicalUsage {
                input_tokens: None,
                output_tokens: Some(7),
            },
        )) else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason.as_deref(), Some("max_tokens"));
        assert_eq!(
            usage,
            AnthropicUsage {
                input_tokens: 0,
                output_tokens: 7
            }
        );
    }

    #[test]
    fn block_framing_events() {
        assert_eq!(parse(encode_block_stop(3)), AnthropicStreamEvent::ContentBlockStop { index: 3 });
        assert_eq!(parse(encode_message_stop()), AnthropicStreamEvent::MessageStop {});
        assert!(matches!(
            parse(encode_text_block_start(0)),
            AnthropicStreamEvent::ContentBlockStart {
                index: 0,
                content_block: AnthropicContentBlock::Text { .. }
            }
        ));
    }
}
