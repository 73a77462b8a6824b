use crate::sse::parse_data_events;
use crate::{FormatAdapter, Result};
use llmtap_types::{CaptureRecord, MessageDraft, Role, ToolCall, ToolDraft};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Adapter for the Anthropic Messages API format.
pub struct ClaudeAdapter;

const STREAM_EVENT_TYPES: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
];

fn map_role(role: &str) -> Role {
    match role {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    }
}

/// Join a tool_result content value (string or block array) into plain text.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .map(|block| match block {
                Value::Object(obj) => obj
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| block.to_string()),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Process a message's content blocks into drafts. Text blocks each become a
/// message, thinking blocks split into `thinking` messages, tool_use blocks
/// collect into one trailing `tool_use` message, tool_result blocks each
/// stand alone.
fn process_blocks(role: Role, blocks: &[Value]) -> Vec<MessageDraft> {
    let mut drafts = Vec::new();
    let mut calls = Vec::new();

    for block in blocks {
        let obj = match block {
            Value::Object(obj) => obj,
            Value::String(s) => {
                drafts.push(MessageDraft::text(role, s.clone()));
                continue;
            }
            other => {
                drafts.push(MessageDraft::text(role, other.to_string()));
                continue;
            }
        };

        match obj.get("type").and_then(Value::as_str).unwrap_or("") {
            "text" => {
                let text = obj.get("text").and_then(Value::as_str).unwrap_or("");
                drafts.push(MessageDraft::text(role, text));
            }
            "thinking" => {
                let thinking = obj.get("thinking").and_then(Value::as_str).unwrap_or("");
                if !thinking.is_empty() {
                    drafts.push(MessageDraft::text(Role::Thinking, thinking));
                }
            }
            "tool_use" => {
                calls.push(ToolCall {
                    name: obj
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    arguments: obj.get("input").cloned().unwrap_or_else(|| json!({})),
                    id: obj.get("id").and_then(Value::as_str).map(str::to_string),
                });
            }
            "tool_result" => {
                let content = obj.get("content").cloned().unwrap_or(Value::Null);
                drafts.push(MessageDraft::tool_result(
                    tool_result_text(&content),
                    obj.get("tool_use_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    obj.get("is_error").and_then(Value::as_bool),
                ));
            }
            "image" => {
                drafts.push(MessageDraft::text(role, "[image]"));
            }
            _ => {
                drafts.push(MessageDraft::text(role, block.to_string()));
            }
        }
    }

    if !calls.is_empty() {
        drafts.push(MessageDraft::tool_use("", calls));
    }
    drafts
}

impl FormatAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn detect(&self, record: &CaptureRecord) -> bool {
        let request = &record.request.body;

        // Streamed responses carry typed events
        if let Some(resp) = &record.response {
            if resp.stream {
                for event in parse_data_events(&resp.sse_lines) {
                    match event.get("type").and_then(Value::as_str) {
                        Some(t) if STREAM_EVENT_TYPES.contains(&t) => return true,
                        _ => {
                            if event.get("choices").is_some() {
                                return false;
                            }
                        }
                    }
                }
            }
        }

        // System prompt as a block list
        if matches!(request.get("system"), Some(Value::Array(_))) {
            return true;
        }

        // Tools declare input_schema instead of function.parameters
        if let Some(Value::Array(tools)) = request.get("tools") {
            if tools
                .first()
                .map(|t| t.get("input_schema").is_some())
                .unwrap_or(false)
            {
                return true;
            }
        }

        // Content block types only Claude uses
        for msg in request
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            if let Some(Value::Array(blocks)) = msg.get("content") {
                for block in blocks {
                    if matches!(
                        block.get("type").and_then(Value::as_str),
                        Some("tool_use" | "tool_result" | "thinking")
                    ) {
                        return true;
                    }
                }
            }
        }

        false
    }

    fn extract_messages(&self, request: &Value) -> Vec<MessageDraft> {
        let mut drafts = Vec::new();

        // System instructions live outside the messages array; lift them to
        // leading system messages. Both the string and block-list forms occur.
        match request.get("system") {
            Some(Value::String(s)) => drafts.push(MessageDraft::text(Role::System, s.clone())),
            Some(Value::Array(blocks)) => {
                for block in blocks {
                    match block {
                        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("text") => {
                            let text = obj.get("text").and_then(Value::as_str).unwrap_or("");
                            drafts.push(MessageDraft::text(Role::System, text));
                        }
                        Value::String(s) => drafts.push(MessageDraft::text(Role::System, s.clone())),
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        for msg in request
            .get("messages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let role = map_role(msg.get("role").and_then(Value::as_str).unwrap_or(""));
            match msg.get("content") {
                Some(Value::String(s)) => drafts.push(MessageDraft::text(role, s.clone())),
                Some(Value::Array(blocks)) => drafts.extend(process_blocks(role, blocks)),
                _ => {}
            }
        }
        drafts
    }

    fn extract_tools(&self, request: &Value) -> Vec<ToolDraft> {
        request
            .get("tools")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .map(|tool| ToolDraft {
                name: tool
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                description: tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                parameters: tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({})),
                is_server_side: false,
            })
            .collect()
    }

    fn extract_response(&self, response: &Value) -> Vec<MessageDraft> {
        let blocks = match response.get("content").and_then(Value::as_array) {
            Some(blocks) if !blocks.is_empty() => blocks,
            _ => return vec![MessageDraft::text(Role::Assistant, "")],
        };

        let mut drafts = Vec::new();
        let mut text = String::new();
        let mut calls = Vec::new();

        for block in blocks {
            let obj = match block {
                Value::Object(obj) => obj,
                other => {
                    text.push_str(&other.to_string());
                    continue;
                }
            };
            match obj.get("type").and_then(Value::as_str).unwrap_or("") {
                "text" => text.push_str(obj.get("text").and_then(Value::as_str).unwrap_or("")),
                "thinking" => {
                    let thinking = obj.get("thinking").and_then(Value::as_str).unwrap_or("");
                    if !thinking.is_empty() {
                        drafts.push(MessageDraft::text(Role::Thinking, thinking));
                    }
                }
                "tool_use" => calls.push(ToolCall {
                    name: obj
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    arguments: obj.get("input").cloned().unwrap_or_else(|| json!({})),
                    id: obj.get("id").and_then(Value::as_str).map(str::to_string),
                }),
                _ => {}
            }
        }

        // Text and tool calls stay separate messages, matching request-side
        // block handling so interning dedups across the conversation.
        if !text.is_empty() {
            drafts.push(MessageDraft::text(Role::Assistant, text));
        }
        if !calls.is_empty() {
            drafts.push(MessageDraft::tool_use("", calls));
        }
        if drafts.is_empty() {
            drafts.push(MessageDraft::text(Role::Assistant, ""));
        }
        drafts
    }

    fn reassemble_stream(&self, sse_lines: &[String]) -> Result<Value> {
        #[derive(Default)]
        struct BlockAccum {
            kind: String,
            text: String,
            name: String,
            input: String,
            id: Option<String>,
        }

        let mut response_id: Option<String> = None;
        let mut model: Option<String> = None;
        let mut stop_reason: Option<String> = None;
        let mut blocks: BTreeMap<u64, BlockAccum> = BTreeMap::new();

        for event in parse_data_events(sse_lines) {
            match event.get("type").and_then(Value::as_str).unwrap_or("") {
                "message_start" => {
                    let message = event.get("message").cloned().unwrap_or(Value::Null);
                    response_id = message.get("id").and_then(Value::as_str).map(str::to_string);
                    model = message
                        .get("model")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
                "content_block_start" => {
                    let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let block = event.get("content_block").cloned().unwrap_or(Value::Null);
                    blocks.insert(
                        index,
                        BlockAccum {
                            kind: block
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("text")
                                .to_string(),
                            text: block
                                .get("text")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                            name: block
                                .get("name")
                                .and_then(Value::as_str)
                                .unwrap_or("")
                                .to_string(),
                            input: String::new(),
                            id: block.get("id").and_then(Value::as_str).map(str::to_string),
                        },
                    );
                }
                "content_block_delta" => {
                    let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let accum = blocks.entry(index).or_insert_with(|| BlockAccum {
                        kind: "text".to_string(),
                        ..BlockAccum::default()
                    });
                    let delta = event.get("delta").cloned().unwrap_or(Value::Null);
                    match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                        "text_delta" => {
                            accum
                                .text
                                .push_str(delta.get("text").and_then(Value::as_str).unwrap_or(""));
                        }
                        "thinking_delta" => {
                            accum.text.push_str(
                                delta.get("thinking").and_then(Value::as_str).unwrap_or(""),
                            );
                        }
                        "input_json_delta" => {
                            accum.input.push_str(
                                delta
                                    .get("partial_json")
                                    .and_then(Value::as_str)
                                    .unwrap_or(""),
                            );
                        }
                        _ => {}
                    }
                }
                "message_delta" => {
                    if let Some(reason) = event
                        .get("delta")
                        .and_then(|d| d.get("stop_reason"))
                        .and_then(Value::as_str)
                    {
                        stop_reason = Some(reason.to_string());
                    }
                }
                _ => {}
            }
        }

        let mut content = Vec::new();
        for accum in blocks.into_values() {
            match accum.kind.as_str() {
                "thinking" => content.push(json!({"type": "thinking", "thinking": accum.text})),
                "tool_use" => {
                    let input = if accum.input.is_empty() {
                        json!({})
                    } else {
                        serde_json::from_str(&accum.input)
                            .unwrap_or_else(|_| json!({ "raw": accum.input }))
                    };
                    let mut block = Map::new();
                    block.insert("type".to_string(), json!("tool_use"));
                    block.insert("name".to_string(), json!(accum.name));
                    block.insert("input".to_string(), input);
                    if let Some(id) = accum.id {
                        block.insert("id".to_string(), json!(id));
                    }
                    content.push(Value::Object(block));
                }
                _ => content.push(json!({"type": "text", "text": accum.text})),
            }
        }

        Ok(json!({
            "id": response_id,
            "model": model,
            "content": content,
            "stop_reason": stop_reason,
        }))
    }

    fn extract_model(&self, record: &CaptureRecord) -> String {
        record
            .request
            .body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    }
}
