use axum::http::StatusCode;
use dialectify_rs::config::{
    AppConfig, ContextBudgetConfig, DialectConfig, DialectRuleConfig, DialectSelection,
};
use dialectify_rs::dialect::DialectRegistry;
use dialectify_rs::emitter::OutputEvent;
use dialectify_rs::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalRole, GenerationParams, IngressApi,
};
use dialectify_rs::stream::{BackendFinishReason, NativeToolCallFragment, RawDelta};
use dialectify_rs::{sse_response, Pipeline, ScriptedBackend};
use futures_util::StreamExt;
use serde_json::{json, Value};

fn request(model: &str, content: &str) -> CanonicalRequest {
    CanonicalRequest {
        model: model.to_string(),
        messages: vec![CanonicalMessage::new(CanonicalRole::User, content)],
        tools: Vec::new(),
        generation: GenerationParams::default(),
        stream: true,
    }
}

fn pipeline(backend: ScriptedBackend) -> Pipeline<ScriptedBackend> {
    Pipeline::new(backend, &AppConfig::default())
}

async fn collect(
    pipeline: &Pipeline<ScriptedBackend>,
    request: &CanonicalRequest,
    protocol: IngressApi,
) -> Vec<OutputEvent> {
    pipeline.stream(request, protocol).await.collect().await
}

fn payload(event: &OutputEvent) -> Value {
    serde_json::from_str(&event.data).expect("event payload")
}

fn messages_text(events: &[OutputEvent]) -> String {
    events
        .iter()
        .filter(|event| event.name == Some("content_block_delta"))
        .filter_map(|event| payload(event)["delta"]["text"].as_str().map(str::to_string))
        .collect()
}

fn messages_tool_uses(events: &[OutputEvent]) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    let mut pending_name = None;
    for event in events {
        let value = payload(event);
        match event.name {
            Some("content_block_start") if value["content_block"]["type"] == "tool_use" => {
                pending_name = value["content_block"]["name"].as_str().map(str::to_string);
            }
            Some("content_block_delta") if value["delta"]["type"] == "input_json_delta" => {
                let input: Value = serde_json::from_str(
                    value["delta"]["partial_json"].as_str().expect("partial_json"),
                )
                .expect("input json");
                out.push((pending_name.take().expect("tool name"), input));
            }
            _ => {}
        }
    }
    out
}

fn stop_reason(events: &[OutputEvent]) -> Value {
    let delta = events
        .iter()
        .find(|event| event.name == Some("message_delta"))
        .expect("message_delta");
    payload(delta)["delta"]["stop_reason"].clone()
}

fn chat_chunks(events: &[OutputEvent]) -> Vec<Value> {
    assert!(events.last().is_some_and(OutputEvent::is_done), "missing [DONE]");
    events[..events.len() - 1].iter().map(payload).collect()
}

fn chat_text(chunks: &[Value]) -> String {
    chunks
        .iter()
        .filter_map(|chunk| chunk["choices"][0]["delta"]["content"].as_str())
        .collect()
}

#[tokio::test]
async fn plain_text_streams_as_one_block() {
    let pipeline = pipeline(ScriptedBackend::from_text(["Hello ", "world"]));
    let events = collect(&pipeline, &request("qwen3-coder", "hi"), IngressApi::Anthropic).await;

    let names: Vec<_> = events.iter().filter_map(|event| event.name).collect();
    assert_eq!(
        names,
        [
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(messages_text(&events), "Hello world");
    assert_eq!(stop_reason(&events), "end_turn");
}

#[tokio::test]
async fn split_tag_marker_becomes_tool_use() {
    let pipeline = pipeline(ScriptedBackend::from_text([
        "<tool",
        "_call>{\"name\":\"get_weather\",",
        "\"arguments\":{\"city\":\"Rome\"}}</tool_call>",
    ]));
    let events = collect(&pipeline, &request("qwen3-coder", "weather?"), IngressApi::Anthropic).await;

    assert_eq!(messages_text(&events), "");
    assert_eq!(
        messages_tool_uses(&events),
        vec![("get_weather".to_string(), json!({"city": "Rome"}))]
    );
    assert_eq!(stop_reason(&events), "tool_use");
    assert!(events.iter().all(|event| !event.data.contains("<tool_call>")));
}

#[tokio::test]
async fn text_before_marker_is_kept_and_markup_is_hidden() {
    let pipeline = pipeline(ScriptedBackend::from_text([
        "Let me check. <tool_call>{\"name\":\"ls\",",
        "\"arguments\":{\"path\":\".\"}}</tool_call>",
    ]));
    let events = collect(&pipeline, &request("Qwen2.5-7B", "files?"), IngressApi::Anthropic).await;

    let text = messages_text(&events);
    assert!(text.starts_with("Let me check."), "got {text:?}");
    assert!(!text.contains("tool_call"));
    assert_eq!(messages_tool_uses(&events).len(), 1);
}

#[tokio::test]
async fn bracket_dialect_repairs_truncated_arguments() {
    let pipeline = pipeline(ScriptedBackend::from_text([
        "Sure.",
        "[TOOL_CALLS]search[ARGS]{\"q\": \"weather\"",
    ]));
    let chunks = chat_chunks(
        &collect(&pipeline, &request("devstral-small-2505", "q"), IngressApi::OpenAiChat).await,
    );

    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");
    assert_eq!(chat_text(&chunks), "Sure.");
    let calls = chunks
        .iter()
        .find_map(|chunk| chunk["choices"][0]["delta"]["tool_calls"].as_array().cloned())
        .expect("tool_calls chunk");
    assert_eq!(calls[0]["function"]["name"], "search");
    let arguments: Value = serde_json::from_str(
        calls[0]["function"]["arguments"].as_str().expect("arguments"),
    )
    .expect("arguments json");
    assert_eq!(arguments, json!({"q": "weather"}));
    assert_eq!(chunks.last().expect("final")["choices"][0]["finish_reason"], "tool_calls");
}

#[tokio::test]
async fn channel_call_only_has_no_display_text() {
    let pipeline = pipeline(ScriptedBackend::from_text([
        "<|channel|>analysis<|message|>Need files.<|end|>",
        "<|start|>assistant<|channel|>commentary to=functions.ls <|constrain|>json",
        "<|message|>{\"path\":\".\"}<|call|>",
    ]));
    let chunks = chat_chunks(
        &collect(&pipeline, &request("gpt-oss-20b", "files?"), IngressApi::OpenAiChat).await,
    );

    assert_eq!(chat_text(&chunks), "");
    assert!(chunks.iter().all(|chunk| !chunk.to_string().contains("<|")));
    assert_eq!(chunks.last().expect("final")["choices"][0]["finish_reason"], "tool_calls");
}

#[tokio::test]
async fn lone_channel_call_segment_yields_only_the_call() {
    let shapes: [&[&str]; 2] = [
        &[
            "<|channel|>commentary to=functions.ls <|constrain|>json",
            "<|message|>{\"path\":\".\"}<|call|>",
        ],
        &[
            "<|start|>assistant<|channel|>commentary to=functions.ls ",
            "<|constrain|>json<|message|>{\"path\":\".\"}<|call|>",
        ],
    ];
    for pieces in shapes {
        let pipeline = pipeline(ScriptedBackend::from_text(pieces.iter().copied()));
        let events =
            collect(&pipeline, &request("gpt-oss-120b", "files?"), IngressApi::Anthropic).await;

        assert_eq!(messages_text(&events), "");
        assert!(events.iter().all(|event| !event.data.contains("<|")));
        assert!(events.iter().all(|event| !event.data.contains("to=functions")));
        assert_eq!(
            messages_tool_uses(&events),
            vec![("ls".to_string(), json!({"path": "."}))]
        );
        assert_eq!(stop_reason(&events), "tool_use");
    }
}

#[tokio::test]
async fn native_tool_calls_pass_through() {
    let fragment = |id: Option<&str>, name: Option<&str>, args: &str| RawDelta {
        native_tool_calls: vec![NativeToolCallFragment {
            index: 0,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: Some(args.to_string()),
        }],
        ..RawDelta::default()
    };
    let pipeline = pipeline(ScriptedBackend::new(vec![
        fragment(Some("call_native"), Some("read_file"), "{\"pa"),
        fragment(None, None, "th\":\"a.txt\"}"),
        RawDelta::finish(BackendFinishReason::ToolCalls),
    ]));
    let events = collect(&pipeline, &request("llama-3.1-8b", "read"), IngressApi::Anthropic).await;

    assert_eq!(
        messages_tool_uses(&events),
        vec![("read_file".to_string(), json!({"path": "a.txt"}))]
    );
    assert_eq!(stop_reason(&events), "tool_use");
}

#[tokio::test]
async fn disabled_dialect_passes_markup_through() {
    let config = AppConfig {
        dialects: DialectConfig {
            default: DialectSelection::Tag,
            rules: vec![DialectRuleConfig {
                contains: "raw".to_string(),
                dialect: DialectSelection::None,
            }],
        },
        ..AppConfig::default()
    };
    let text = "<tool_call>{\"name\":\"ls\",\"arguments\":{\"a\":1}}</tool_call>";
    let pipeline = Pipeline::new(ScriptedBackend::from_text([text]), &config);
    let events = collect(&pipeline, &request("qwen-raw", "x"), IngressApi::Anthropic).await;

    assert_eq!(messages_text(&events), text);
    assert_eq!(stop_reason(&events), "end_turn");
}

#[tokio::test]
async fn interruption_ends_with_inline_notice() {
    let pipeline = pipeline(ScriptedBackend::from_text(["Partial answer"]).interrupted_with("connection reset"));
    let events = collect(&pipeline, &request("qwen3", "x"), IngressApi::Anthropic).await;

    let text = messages_text(&events);
    assert!(text.starts_with("Partial answer\n[Stream interrupted: "), "got {text:?}");
    assert!(text.contains("connection reset"));
    assert_eq!(events.last().and_then(|event| event.name), Some("message_stop"));
}

#[tokio::test]
async fn interruption_while_buffering_discards_markup() {
    let pipeline = pipeline(
        ScriptedBackend::from_text(["ok <tool_call>{\"name\":\"ls\""]).interrupted_with("eof"),
    );
    let chunks = chat_chunks(&collect(&pipeline, &request("qwen3", "x"), IngressApi::OpenAiChat).await);

    let text = chat_text(&chunks);
    assert!(!text.contains("tool_call"), "got {text:?}");
    assert!(text.contains("[Stream interrupted: "));
    assert_eq!(chunks.last().expect("final")["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn backend_start_failure_is_rendered_inline() {
    let pipeline = pipeline(ScriptedBackend::failing("connection refused"));
    let events = collect(&pipeline, &request("qwen3", "x"), IngressApi::Anthropic).await;

    let text = messages_text(&events);
    assert!(text.starts_with("[Backend error: "), "got {text:?}");
    assert!(text.contains("connection refused"));
    assert_eq!(stop_reason(&events), "end_turn");
    assert_eq!(
        events.iter().filter(|event| event.name == Some("message_stop")).count(),
        1
    );
}

#[tokio::test]
async fn context_advisory_precedes_model_output() {
    let budget = ContextBudgetConfig {
        enabled: true,
        context_limit: 100,
        warning_threshold: 10,
    };
    let pipeline = Pipeline::with_registry(
        ScriptedBackend::from_text(["Answer"]),
        DialectRegistry::builtin(),
        budget,
        4096,
    );
    let request = request("qwen3", &"x".repeat(400));
    let stream = pipeline.stream(&request, IngressApi::Anthropic).await;
    // 400 chars -> 100 tokens + 2; available = 100 - min(4096, 50) = 50.
    assert_eq!(stream.budget_status(), Some("usage=204%;tokens=102;limit=50"));
    let events: Vec<OutputEvent> = stream.collect().await;

    let first_delta = events
        .iter()
        .find(|event| event.name == Some("content_block_delta"))
        .map(payload)
        .expect("advisory delta");
    assert_eq!(first_delta["index"], 0);
    let advisory = first_delta["delta"]["text"].as_str().expect("text");
    assert!(advisory.contains("Context is 204% full (102/50 tokens)"));
    assert!(advisory.ends_with("\n\n"));
    assert!(messages_text(&events).ends_with("Answer"));
}

#[tokio::test]
async fn disabled_budget_emits_no_advisory() {
    let budget = ContextBudgetConfig {
        enabled: false,
        context_limit: 100,
        warning_threshold: 10,
    };
    let pipeline = Pipeline::with_registry(
        ScriptedBackend::from_text(["Answer"]),
        DialectRegistry::builtin(),
        budget,
        4096,
    );
    let stream = pipeline
        .stream(&request("qwen3", &"x".repeat(400)), IngressApi::Anthropic)
        .await;
    assert!(stream.budget_status().is_none());
    let events: Vec<OutputEvent> = stream.collect().await;
    assert_eq!(messages_text(&events), "Answer");
}

#[tokio::test]
async fn usage_reaches_the_terminal_event() {
    let mut last = RawDelta::finish(BackendFinishReason::Stop);
    last.usage = Some(dialectify_rs::protocol::canonical::CanonicalUsage {
        input_tokens: Some(9),
        output_tokens: Some(3),
    });
    let pipeline = pipeline(ScriptedBackend::new(vec![RawDelta::text("ok"), last]));
    let chunks = chat_chunks(&collect(&pipeline, &request("qwen3", "x"), IngressApi::OpenAiChat).await);

    let usage = &chunks.last().expect("final")["usage"];
    assert_eq!(usage["prompt_tokens"], 9);
    assert_eq!(usage["completion_tokens"], 3);
    assert_eq!(usage["total_tokens"], 12);
}

#[tokio::test]
async fn non_streaming_response_is_materialized() {
    let pipeline = pipeline(ScriptedBackend::from_text([
        "Checking. ",
        "<tool_call>{\"name\":\"get_weather\",\"arguments\":{\"city\":\"Rome\"}}</tool_call>",
    ]));
    let response = pipeline
        .complete(&request("qwen3", "weather?"), IngressApi::Anthropic)
        .await;
    let value = serde_json::to_value(&response).expect("serialize");

    assert_eq!(value["type"], "message");
    assert_eq!(value["stop_reason"], "tool_use");
    assert_eq!(value["content"][0]["type"], "text");
    assert_eq!(value["content"][1]["name"], "get_weather");
    assert_eq!(value["content"][1]["input"], json!({"city": "Rome"}));
}

#[tokio::test]
async fn non_streaming_backend_failure() {
    let pipeline = pipeline(ScriptedBackend::failing("boom"));
    let response = pipeline
        .complete(&request("qwen3", "x"), IngressApi::OpenAiChat)
        .await;
    let value = serde_json::to_value(&response).expect("serialize");
    let content = value["choices"][0]["message"]["content"].as_str().expect("content");
    assert!(content.starts_with("[Backend error: "));
    assert_eq!(value["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn sse_response_sets_headers_and_frames() {
    let pipeline = pipeline(ScriptedBackend::from_text(["hi"]));
    let stream = pipeline.stream(&request("qwen3", "x"), IngressApi::OpenAiChat).await;
    let response = sse_response(stream);

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let body = String::from_utf8(body.to_vec()).expect("utf8");
    assert!(body.starts_with("data: {"));
    assert!(body.ends_with("data: [DONE]\n\n"));
    assert!(body.contains("\"content\":\"hi\""));
}

#[tokio::test]
async fn request_reaches_backend_unchanged() {
    let pipeline = pipeline(ScriptedBackend::from_text(["ok"]));
    let request = request("qwen3", "hello");
    let _ = collect(&pipeline, &request, IngressApi::Anthropic).await;
    assert_eq!(pipeline.backend().last_request(), Some(request));
}
