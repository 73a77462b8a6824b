use crate::sse::parse_data_events;
use crate::{FormatAdapter, Result};
use llmtap_types::{CaptureRecord, MessageDraft, Role, ToolCall, ToolDraft};
use serde_json::{json, Value};

/// Adapter for the Gemini generateContent format.
///
/// Differences from OpenAI/Claude: messages live in `contents` with roles
/// `user`/`model`, content is a `parts` array (`text`, `functionCall`,
/// `functionResponse`), the system prompt is `system_instruction`, tool
/// definitions are wrapped in `function_declarations`, and responses arrive
/// under `candidates[0].content`.
pub struct GeminiAdapter;

/// Provider-hosted tool keys on a `tools[]` entry, in both spellings,
/// mapped to a normalized name.
const SERVER_SIDE_TOOLS: &[(&str, &str)] = &[
    ("googleSearch", "google_search"),
    ("google_search", "google_search"),
    ("codeExecution", "code_execution"),
    ("code_execution", "code_execution"),
    ("urlContext", "url_context"),
    ("url_context", "url_context"),
];

fn map_role(role: &str) -> Role {
    match role {
        "model" => Role::Assistant,
        // Absent roles occur on function-response turns
        _ => Role::User,
    }
}

/// Process a parts array into drafts: text parts merge into one message,
/// function calls collect into one tool_use message, function responses
/// each become a tool_result correlated by function name.
fn process_parts(base_role: Role, parts: &[Value]) -> Vec<MessageDraft> {
    let mut drafts = Vec::new();
    let mut text = String::new();
    let mut calls = Vec::new();

    for part in parts {
        let obj = match part.as_object() {
            Some(obj) => obj,
            None => continue,
        };

        if let Some(t) = obj.get("text").and_then(Value::as_str) {
            text.push_str(t);
        }

        let call = obj.get("function_call").or_else(|| obj.get("functionCall"));
        if let Some(call) = call {
            calls.push(ToolCall {
                name: call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                id: call.get("id").and_then(Value::as_str).map(str::to_string),
            });
        }

        let response = obj
            .get("function_response")
            .or_else(|| obj.get("functionResponse"));
        if let Some(response) = response {
            let name = response
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let content = match response.get("response") {
                Some(Value::Object(inner)) => inner
                    .get("content")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Value::Object(inner.clone()).to_string()),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            // The function name is the only correlation Gemini provides
            drafts.push(MessageDraft::tool_result(content, Some(name), None));
        }

        // thoughtSignature marks thinking but exposes no content; skip it
    }

    if !text.is_empty() {
        drafts.push(MessageDraft::text(base_role, text));
    }
    if !calls.is_empty() {
        drafts.push(MessageDraft::tool_use("", calls));
    }
    drafts
}

impl FormatAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn detect(&self, record: &CaptureRecord) -> bool {
        let request = &record.request.body;

        if request.get("contents").is_some() || request.get("system_instruction").is_some() {
            return true;
        }

        if let Some(Value::Array(tools)) = request.get("tools") {
            if tools
                .first()
                .map(|t| t.get("function_declarations").is_some())
                .unwrap_or(false)
            {
                return true;
            }
        }

        if let Some(resp) = &record.response {
            if resp.stream {
                if parse_data_events(&resp.sse_lines)
                    .iter()
                    .any(|event| event.get("candidates").is_some())
                {
                    return true;
                }
            } else {
                if resp.body.get("modelVersion").is_some() {
                    return true;
                }
                let candidate = resp
                    .body
                    .get("candidates")
                    .and_then(Value::as_array)
                    .and_then(|c| c.first());
                if let Some(candidate) = candidate {
                    let content = candidate.get("content");
                    if content.and_then(|c| c.get("parts")).is_some()
                        && content.and_then(|c| c.get("role")).is_some()
                    {
                        return true;
                    }
                }
            }
        }

        false
    }

    fn extract_messages(&self, request: &Value) -> Vec<MessageDraft> {
        let mut drafts = Vec::new();

        // system_instruction lifts to leading system messages
        if let Some(instruction) = request.get("system_instruction") {
            for part in instruction
                .get("parts")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                match part {
                    Value::Object(obj) => {
                        if let Some(text) = obj.get("text").and_then(Value::as_str) {
                            if !text.is_empty() {
                                drafts.push(MessageDraft::text(Role::System, text));
                            }
                        }
                    }
                    Value::String(s) => drafts.push(MessageDraft::text(Role::System, s.clone())),
                    _ => {}
                }
            }
        }

        for content in request
            .get("contents")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            let role = map_role(content.get("role").and_then(Value::as_str).unwrap_or(""));
            let parts = content
                .get("parts")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            drafts.extend(process_parts(role, parts));
        }
        drafts
    }

    fn extract_tools(&self, request: &Value) -> Vec<ToolDraft> {
        let mut tools = Vec::new();
        for tool in request
            .get("tools")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
        {
            for decl in tool
                .get("function_declarations")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[])
            {
                tools.push(ToolDraft {
                    name: decl
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    description: decl
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    parameters: decl.get("parameters").cloned().unwrap_or_else(|| json!({})),
                    is_server_side: false,
                });
            }

            // Provider-hosted tools the client cannot implement
            for (key, name) in SERVER_SIDE_TOOLS {
                if tool.get(*key).is_some() {
                    tools.push(ToolDraft {
                        name: name.to_string(),
                        description: String::new(),
                        parameters: json!({}),
                        is_server_side: true,
                    });
                }
            }
        }
        tools
    }

    fn extract_response(&self, response: &Value) -> Vec<MessageDraft> {
        let parts = response
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array);

        let drafts = match parts {
            Some(parts) if !parts.is_empty() => process_parts(Role::Assistant, parts),
            _ => Vec::new(),
        };
        if drafts.is_empty() {
            return vec![MessageDraft::text(Role::Assistant, "")];
        }
        drafts
    }

    fn reassemble_stream(&self, sse_lines: &[String]) -> Result<Value> {
        let mut model: Option<String> = None;
        let mut text = String::new();
        let mut other_parts: Vec<Value> = Vec::new();

        for event in parse_data_events(sse_lines) {
            if model.is_none() {
                model = event
                    .get("modelVersion")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            let parts = event
                .get("candidates")
                .and_then(Value::as_array)
                .and_then(|candidates| candidates.first())
                .and_then(|candidate| candidate.get("content"))
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array);
            for part in parts.map(Vec::as_slice).unwrap_or(&[]) {
                match part.get("text").and_then(Value::as_str) {
                    Some(t) => text.push_str(t),
                    None => other_parts.push(part.clone()),
                }
            }
        }

        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(json!({ "text": text }));
        }
        parts.extend(other_parts);

        Ok(json!({
            "candidates": [{ "content": { "role": "model", "parts": parts } }],
            "modelVersion": model,
        }))
    }

    fn extract_model(&self, record: &CaptureRecord) -> String {
        if let Some(resp) = &record.response {
            if let Some(version) = resp.body.get("modelVersion").and_then(Value::as_str) {
                return version.to_string();
            }
        }
        if let Some(model) = record.request.body.get("model").and_then(Value::as_str) {
            return model.to_string();
        }
        // Streamed captures carry modelVersion inside the chunks
        if let Some(resp) = &record.response {
            if resp.stream {
                for event in parse_data_events(&resp.sse_lines) {
                    if let Some(version) = event.get("modelVersion").and_then(Value::as_str) {
                        return version.to_string();
                    }
                }
            }
        }
        String::new()
    }
}
