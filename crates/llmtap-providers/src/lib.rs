use llmtap_types::{CaptureRecord, MessageDraft, Role, ToolDraft};
use serde_json::Value;

// Adapter implementations (internal modules)
pub mod claude;
pub mod gemini;
pub mod openai;

// SSE line handling shared with the capture path
pub mod sse;

// Adapter registry
pub mod registry;

mod error;

pub use claude::ClaudeAdapter;
pub use error::{Error, Result};
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;
pub use registry::{AdapterRegistry, ApiFormat};

/// Provider-neutral extraction of one capture record.
///
/// The cook stages downstream of the adapters operate only on this form.
#[derive(Debug, Clone)]
pub struct NormalizedRecord {
    pub request_messages: Vec<MessageDraft>,
    pub response_messages: Vec<MessageDraft>,
    pub tools: Vec<ToolDraft>,
    pub model: String,
}

/// Per-format translation of raw captured JSON into normalized form.
///
/// Responsibilities:
/// - Recognize records in the format (`detect`)
/// - Map provider roles and content shapes onto the normalized role set
/// - Extract tool definitions (flagging provider-hosted tools)
/// - Reassemble buffered SSE streams into a single logical response
pub trait FormatAdapter: Send + Sync {
    /// Unique format ID (e.g. "openai", "claude", "gemini")
    fn name(&self) -> &'static str;

    /// Check if a capture record belongs to this format
    fn detect(&self, record: &CaptureRecord) -> bool;

    /// Extract the ordered input messages from a request body
    fn extract_messages(&self, request: &Value) -> Vec<MessageDraft>;

    /// Extract tool definitions from a request body
    fn extract_tools(&self, request: &Value) -> Vec<ToolDraft>;

    /// Extract the ordered output messages from a (reassembled) response body
    fn extract_response(&self, response: &Value) -> Vec<MessageDraft>;

    /// Reassemble buffered SSE lines into one logical response body
    fn reassemble_stream(&self, sse_lines: &[String]) -> Result<Value>;

    /// Extract the model identifier for a record
    fn extract_model(&self, record: &CaptureRecord) -> String;
}

/// Drive one record through an adapter.
///
/// Response handling is uniform across formats: a streamed capture is
/// reassembled first (even when partial, so a truncated exchange still
/// yields the content that did arrive); a missing response maps to a single
/// assistant message carrying the capture error, or an empty assistant
/// message when there is none.
pub fn normalize_record(
    adapter: &dyn FormatAdapter,
    record: &CaptureRecord,
) -> Result<NormalizedRecord> {
    if !record.request.body.is_object() {
        return Err(Error::MalformedRecord(format!(
            "record {}: request body is not a JSON object",
            record.id
        )));
    }

    let request_messages = adapter.extract_messages(&record.request.body);
    let tools = adapter.extract_tools(&record.request.body);

    let mut response_messages = match &record.response {
        Some(resp) if resp.stream && !resp.sse_lines.is_empty() => {
            let reassembled = adapter.reassemble_stream(&resp.sse_lines)?;
            adapter.extract_response(&reassembled)
        }
        Some(resp) if !resp.body.is_null() => adapter.extract_response(&resp.body),
        _ => match &record.error {
            Some(reason) => vec![MessageDraft::text(
                Role::Assistant,
                format!("Error: {}", reason),
            )],
            None => vec![MessageDraft::text(Role::Assistant, "")],
        },
    };
    if response_messages.is_empty() {
        response_messages.push(MessageDraft::text(Role::Assistant, ""));
    }

    Ok(NormalizedRecord {
        request_messages,
        response_messages,
        tools,
        model: adapter.extract_model(record),
    })
}

#[cfg(test)]
pub(crate) mod testutil {
    use llmtap_types::{CaptureRecord, CapturedRequest, CapturedResponse};
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub fn record_with(request_body: Value, response: Option<CapturedResponse>) -> CaptureRecord {
        CaptureRecord {
            id: "rec-1".to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            request: CapturedRequest {
                url: "/v1/test".to_string(),
                method: "POST".to_string(),
                headers: BTreeMap::new(),
                body: request_body,
            },
            response,
            duration_ms: 10,
            error: None,
        }
    }

    pub fn whole_response(body: Value) -> CapturedResponse {
        CapturedResponse::whole(200, BTreeMap::new(), body)
    }

    pub fn streamed_response(lines: &[&str]) -> CapturedResponse {
        CapturedResponse::streamed(
            200,
            BTreeMap::new(),
            lines.iter().map(|l| l.to_string()).collect(),
        )
    }
}
