//! Content-addressed interning of messages and tools.
//!
//! Ids are pure functions of canonical content: the first 16 hex characters
//! of the SHA-256 of the canonical JSON form. Two records producing the same
//! canonical content intern to the same id, so the bundle holds each unique
//! message and tool exactly once.

use llmtap_types::{Message, MessageDraft, Tool, ToolCall, ToolDraft};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Canonical form of a message: sorted keys (serde_json maps are ordered),
/// absent optional fields dropped, missing tool-call list treated as empty.
fn canonical_message(draft: &MessageDraft) -> Value {
    let mut obj = Map::new();
    obj.insert("content".to_string(), json!(draft.content));
    obj.insert("role".to_string(), json!(draft.role.as_str()));
    let calls: Vec<Value> = draft
        .tool_calls
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .map(canonical_tool_call)
        .collect();
    obj.insert("tool_calls".to_string(), Value::Array(calls));
    if let Some(id) = &draft.tool_use_id {
        obj.insert("tool_use_id".to_string(), json!(id));
    }
    if let Some(is_error) = draft.is_error {
        obj.insert("is_error".to_string(), json!(is_error));
    }
    Value::Object(obj)
}

fn canonical_tool_call(call: &ToolCall) -> Value {
    let mut obj = Map::new();
    obj.insert("arguments".to_string(), call.arguments.clone());
    obj.insert("name".to_string(), json!(call.name));
    if let Some(id) = &call.id {
        obj.insert("id".to_string(), json!(id));
    }
    Value::Object(obj)
}

fn canonical_tool(draft: &ToolDraft) -> Value {
    json!({
        "description": draft.description,
        "is_server_side": draft.is_server_side,
        "name": draft.name,
        "parameters": draft.parameters,
    })
}

fn hash16(value: &Value) -> String {
    let digest = Sha256::digest(value.to_string().as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Stable content id for a message draft.
pub fn message_id(draft: &MessageDraft) -> String {
    hash16(&canonical_message(draft))
}

/// Stable content id for a tool draft.
pub fn tool_id(draft: &ToolDraft) -> String {
    hash16(&canonical_tool(draft))
}

/// Master collections of deduplicated messages and tools, in first-seen order.
#[derive(Default)]
pub struct Interner {
    messages: Vec<Message>,
    tools: Vec<Tool>,
    message_ids: HashSet<String>,
    tool_ids: HashSet<String>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_message(&mut self, draft: MessageDraft) -> String {
        let id = message_id(&draft);
        if self.message_ids.insert(id.clone()) {
            self.messages.push(Message {
                id: id.clone(),
                role: draft.role,
                content: draft.content,
                tool_calls: draft.tool_calls,
                tool_use_id: draft.tool_use_id,
                is_error: draft.is_error,
            });
        }
        id
    }

    pub fn intern_tool(&mut self, draft: ToolDraft) -> String {
        let id = tool_id(&draft);
        if self.tool_ids.insert(id.clone()) {
            self.tools.push(Tool {
                id: id.clone(),
                name: draft.name,
                description: draft.description,
                parameters: draft.parameters,
                is_server_side: draft.is_server_side,
            });
        }
        id
    }

    pub fn into_parts(self) -> (Vec<Message>, Vec<Tool>) {
        (self.messages, self.tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmtap_types::Role;

    fn draft(content: &str) -> MessageDraft {
        MessageDraft::text(Role::User, content)
    }

    #[test]
    fn test_interning_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern_message(draft("hello"));
        let b = interner.intern_message(draft("hello"));
        assert_eq!(a, b);
        let (messages, _) = interner.into_parts();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_id_is_pure_function_of_content() {
        assert_eq!(message_id(&draft("hello")), message_id(&draft("hello")));
        assert_ne!(message_id(&draft("hello")), message_id(&draft("hello!")));
        // Role participates in the canonical form
        assert_ne!(
            message_id(&MessageDraft::text(Role::User, "x")),
            message_id(&MessageDraft::text(Role::Assistant, "x"))
        );
    }

    #[test]
    fn test_missing_tool_calls_equals_empty() {
        let with_none = draft("x");
        let mut with_empty = draft("x");
        with_empty.tool_calls = Some(vec![]);
        assert_eq!(message_id(&with_none), message_id(&with_empty));
    }

    #[test]
    fn test_tool_call_argument_key_order_is_canonical() {
        let a = MessageDraft::tool_use(
            "",
            vec![ToolCall {
                name: "f".to_string(),
                arguments: serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap(),
                id: None,
            }],
        );
        let b = MessageDraft::tool_use(
            "",
            vec![ToolCall {
                name: "f".to_string(),
                arguments: serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap(),
                id: None,
            }],
        );
        assert_eq!(message_id(&a), message_id(&b));
    }

    #[test]
    fn test_tool_interning() {
        let mut interner = Interner::new();
        let t = ToolDraft {
            name: "bash".to_string(),
            description: "run a command".to_string(),
            parameters: serde_json::json!({"type": "object"}),
            is_server_side: false,
        };
        let a = interner.intern_tool(t.clone());
        let b = interner.intern_tool(t.clone());
        assert_eq!(a, b);

        let mut hosted = t;
        hosted.is_server_side = true;
        let c = interner.intern_tool(hosted);
        assert_ne!(a, c);

        let (_, tools) = interner.into_parts();
        assert_eq!(tools.len(), 2);
    }
}
