use crate::sse::parse_data_events;
use crate::{FormatAdapter, Result};
use llmtap_types::{CaptureRecord, MessageDraft, Role, ToolCall, ToolDraft};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Adapter for the OpenAI chat-completions format.
///
/// OpenAI is the registry fallback: any record without Claude or Gemini
/// indicators that still carries a chat payload lands here.
pub struct OpenAiAdapter;

fn map_role(role: &str) -> Role {
    match role {
        "system" | "developer" => Role::System,
        "assistant" => Role::Assistant,
        "tool" | "function" => Role::ToolResult,
        _ => Role::User,
    }
}

/// Flatten OpenAI tool calls to the normalized `{name, arguments, id}` shape.
/// String arguments are decoded; undecodable strings are kept as `{"raw": …}`.
fn parse_tool_calls(raw: &[Value]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for tc in raw {
        let (name, arguments) = match tc.get("function") {
            Some(func) if func.is_object() => {
                let name = func.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = match func.get("arguments") {
                    Some(Value::String(s)) => serde_json::from_str(s)
                        .unwrap_or_else(|_| json!({ "raw": s })),
                    Some(other) => other.clone(),
                    None => json!({}),
                };
                (name.to_string(), arguments)
            }
            _ => {
                // Already flat or unknown structure
                let name = tc.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = tc.get("arguments").cloned().unwrap_or_else(|| json!({}));
                (name.to_string(), arguments)
            }
        };
        calls.push(ToolCall {
            name,
            arguments,
            id: tc.get("id").and_then(Value::as_str).map(str::to_string),
        });
    }
    calls
}

/// Extract display text from one element of a content array.
fn content_item_text(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("text") => obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            Some("image_url") => {
                let url = match obj.get("image_url") {
                    Some(Value::Object(inner)) => {
                        inner.get("url").and_then(Value::as_str).unwrap_or("")
                    }
                    Some(Value::String(s)) => s.as_str(),
                    _ => "",
                };
                if url.starts_with("data:") {
                    "[image: base64 data]".to_string()
                } else {
                    format!("[image: {}]", url)
                }
            }
            _ => item.to_string(),
        },
        other => other.to_string(),
    }
}

/// Emit the draft(s) for an assistant turn: text and tool calls become
/// separate messages so request- and response-side shapes intern identically.
fn push_turn(
    drafts: &mut Vec<MessageDraft>,
    role: Role,
    text: String,
    calls: Option<Vec<ToolCall>>,
    tool_use_id: Option<String>,
) {
    match calls {
        Some(calls) if !calls.is_empty() => {
            if !text.is_empty() {
                drafts.push(MessageDraft::text(role, text));
            }
            drafts.push(MessageDraft::tool_use("", calls));
        }
        _ => {
            if role == Role::ToolResult {
                drafts.push(MessageDraft::tool_result(text, tool_use_id, None));
            } else {
                drafts.push(MessageDraft::text(role, text));
            }
        }
    }
}

impl FormatAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn detect(&self, record: &CaptureRecord) -> bool {
        if crate::ClaudeAdapter.detect(record) || crate::GeminiAdapter.detect(record) {
            return false;
        }
        // Require a recognizable chat payload rather than accepting anything:
        // records with none of the known container fields are unsupported.
        if record
            .request
            .body
            .get("messages")
            .and_then(Value::as_array)
            .is_some()
        {
            return true;
        }
        match &record.response {
            Some(resp) if resp.stream => parse_data_events(&resp.sse_lines)
                .iter()
                .any(|event| event.get("choices").is_some()),
            Some(resp) => resp.body.get("choices").is_some(),
            None => false,
        }
    }

    fn extract_messages(&self, request: &Value) -> Vec<MessageDraft> {
        let mut drafts = Vec::new();
        let messages = match request.get("messages").and_then(Value::as_array) {
            Some(messages) => messages,
            None => return drafts,
        };

        for msg in messages {
            let role = map_role(msg.get("role").and_then(Value::as_str).unwrap_or(""));
            let tool_calls = msg
                .get("tool_calls")
                .and_then(Value::as_array)
                .map(|raw| parse_tool_calls(raw));
            let tool_call_id = msg
                .get("tool_call_id")
                .and_then(Value::as_str)
                .map(str::to_string);

            match msg.get("content") {
                // Content arrays expand one message per item
                Some(Value::Array(items)) => {
                    for item in items {
                        drafts.push(MessageDraft::text(role, content_item_text(item)));
                    }
                    if let Some(calls) = tool_calls {
                        if !calls.is_empty() {
                            drafts.push(MessageDraft::tool_use("", calls));
                        }
                    }
                }
                content => {
                    let text = content
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    push_turn(&mut drafts, role, text, tool_calls, tool_call_id);
                }
            }
        }
        drafts
    }

    fn extract_tools(&self, request: &Value) -> Vec<ToolDraft> {
        let mut tools = Vec::new();
        let defined = match request.get("tools").and_then(Value::as_array) {
            Some(defined) => defined,
            None => return tools,
        };
        for tool in defined {
            if tool.get("type").and_then(Value::as_str) != Some("function") {
                continue;
            }
            let func = tool.get("function").cloned().unwrap_or(Value::Null);
            tools.push(ToolDraft {
                name: func
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                description: func
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                parameters: func.get("parameters").cloned().unwrap_or_else(|| json!({})),
                is_server_side: false,
            });
        }
        tools
    }

    fn extract_response(&self, response: &Value) -> Vec<MessageDraft> {
        let message = response
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"));
        let message = match message {
            Some(message) => message,
            None => return vec![MessageDraft::text(Role::Assistant, "")],
        };

        let text = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|raw| parse_tool_calls(raw));

        let mut drafts = Vec::new();
        push_turn(&mut drafts, Role::Assistant, text, calls, None);
        drafts.retain(|d| d.tool_calls.is_some() || !d.content.is_empty());
        if drafts.is_empty() {
            drafts.push(MessageDraft::text(Role::Assistant, ""));
        }
        drafts
    }

    fn reassemble_stream(&self, sse_lines: &[String]) -> Result<Value> {
        let mut response_id: Option<String> = None;
        let mut model: Option<String> = None;
        let mut content = String::new();
        // index -> accumulating call; arguments arrive as string fragments
        let mut calls: BTreeMap<u64, (String, String, String)> = BTreeMap::new();

        for event in parse_data_events(sse_lines) {
            if response_id.is_none() {
                response_id = event.get("id").and_then(Value::as_str).map(str::to_string);
            }
            if model.is_none() {
                model = event
                    .get("model")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }

            let delta = match event
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|choices| choices.first())
                .and_then(|choice| choice.get("delta"))
            {
                Some(delta) => delta,
                None => continue,
            };

            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                content.push_str(text);
            }

            for tc in delta
                .get("tool_calls")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                let entry = calls.entry(index).or_default();
                if let Some(id) = tc.get("id").and_then(Value::as_str) {
                    entry.0 = id.to_string();
                }
                if let Some(func) = tc.get("function") {
                    if let Some(name) = func.get("name").and_then(Value::as_str) {
                        entry.1 = name.to_string();
                    }
                    if let Some(fragment) = func.get("arguments").and_then(Value::as_str) {
                        entry.2.push_str(fragment);
                    }
                }
            }
        }

        let mut message = Map::new();
        message.insert("role".to_string(), json!("assistant"));
        message.insert("content".to_string(), json!(content));
        if !calls.is_empty() {
            let rendered: Vec<Value> = calls
                .into_values()
                .map(|(id, name, arguments)| {
                    json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments },
                    })
                })
                .collect();
            message.insert("tool_calls".to_string(), Value::Array(rendered));
        }

        Ok(json!({
            "id": response_id,
            "model": model,
            "choices": [{ "message": Value::Object(message) }],
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
