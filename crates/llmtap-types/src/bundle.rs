use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolUse,
    ToolResult,
    Thinking,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolUse => "tool_use",
            Role::ToolResult => "tool_result",
            Role::Thinking => "thinking",
        }
    }
}

/// A single tool invocation attached to a `tool_use` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Message content before interning. Two drafts with equal fields intern to
/// the same id; the interner derives the id from this canonical content.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDraft {
    pub role: Role,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_use_id: Option<String>,
    pub is_error: Option<bool>,
}

impl MessageDraft {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: None,
            tool_use_id: None,
            is_error: None,
        }
    }

    pub fn tool_use(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::ToolUse,
            content: content.into(),
            tool_calls: Some(calls),
            tool_use_id: None,
            is_error: None,
        }
    }

    pub fn tool_result(
        content: impl Into<String>,
        tool_use_id: Option<String>,
        is_error: Option<bool>,
    ) -> Self {
        Self {
            role: Role::ToolResult,
            content: content.into(),
            tool_calls: None,
            tool_use_id,
            is_error,
        }
    }
}

/// Tool definition content before interning.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDraft {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// True for provider-hosted tools the client cannot implement
    /// (e.g. Gemini's googleSearch).
    pub is_server_side: bool,
}

/// Deduplicated message with content-derived stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Deduplicated tool definition with content-derived stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub is_server_side: bool,
}

/// One normalized request/response exchange, referencing interned messages
/// and tools by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestNode {
    pub id: String,
    /// Parent in the dependency forest; null for roots.
    pub parent_id: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub request_messages: Vec<String>,
    pub response_messages: Vec<String>,
    pub model: String,
    pub tools: Vec<String>,
    pub duration_ms: u64,
}

/// The cooked output consumed by the viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceBundle {
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub requests: Vec<RequestNode>,
}

impl TraceBundle {
    /// Check whether a JSON document already has the bundle shape.
    pub fn looks_like_bundle(value: &Value) -> bool {
        value.get("messages").is_some()
            && value.get("tools").is_some()
            && value.get("requests").is_some()
    }
}
