use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One captured proxy exchange, stored as a single line of the capture log.
///
/// Records are append-only: a record is written once, after the upstream
/// response has fully terminated, and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Opaque unique identifier assigned at capture time.
    pub id: String,

    /// RFC 3339 wall-clock instant of request receipt, millisecond precision.
    pub timestamp: String,

    pub request: CapturedRequest,

    /// Absent when the upstream call failed before any response bytes arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,

    #[serde(default)]
    pub duration_ms: u64,

    /// Human-readable reason when the exchange failed or was truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedRequest {
    /// Path + query of the upstream call.
    pub url: String,

    pub method: String,

    /// Request headers minus hop-by-hop headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Decoded JSON body, or `{"base64": "..."}` for non-JSON payloads.
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Decoded JSON body for whole responses, or the eagerly reassembled
    /// payload for streamed responses captured with reassembly enabled.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub body: Value,

    /// True when the upstream response was a Server-Sent-Event stream.
    #[serde(default, skip_serializing_if = "is_false")]
    pub stream: bool,

    /// Raw SSE lines, verbatim, when reassembly is deferred to the cook pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sse_lines: Vec<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl CaptureRecord {
    /// Capture timestamp as Unix milliseconds. Unparsable timestamps map to 0.
    pub fn timestamp_ms(&self) -> i64 {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(0)
    }
}

impl CapturedResponse {
    /// Whole-response constructor.
    pub fn whole(status: u16, headers: BTreeMap<String, String>, body: Value) -> Self {
        Self {
            status,
            headers,
            body,
            stream: false,
            sse_lines: Vec::new(),
        }
    }

    /// Streamed-response constructor with reassembly deferred to cook.
    pub fn streamed(status: u16, headers: BTreeMap<String, String>, sse_lines: Vec<String>) -> Self {
        Self {
            status,
            headers,
            body: Value::Null,
            stream: true,
            sse_lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_ms() {
        let record = CaptureRecord {
            id: "r1".to_string(),
            timestamp: "2024-01-01T00:00:01.500Z".to_string(),
            request: CapturedRequest {
                url: "/v1/chat/completions".to_string(),
                method: "POST".to_string(),
                headers: BTreeMap::new(),
                body: Value::Null,
            },
            response: None,
            duration_ms: 0,
            error: None,
        };
        assert_eq!(record.timestamp_ms(), 1_704_067_201_500);

        let bad = CaptureRecord {
            timestamp: "not-a-timestamp".to_string(),
            ..record
        };
        assert_eq!(bad.timestamp_ms(), 0);
    }

    #[test]
    fn test_streamed_response_roundtrip() {
        let response = CapturedResponse::streamed(
            200,
            BTreeMap::new(),
            vec!["data: {\"x\":1}".to_string(), "data: [DONE]".to_string()],
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["stream"], json!(true));
        assert!(json.get("body").is_none());

        let back: CapturedResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back.sse_lines.len(), 2);
        assert!(back.stream);
    }

    #[test]
    fn test_whole_response_omits_stream_fields() {
        let response = CapturedResponse::whole(200, BTreeMap::new(), json!({"ok": true}));
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("stream").is_none());
        assert!(json.get("sse_lines").is_none());
    }
}
