//! Server-Sent-Event helpers shared by the capture path and the adapters.
//!
//! The capture log stores the raw `data:`-prefixed lines of a streamed
//! response verbatim; the adapters decode them back into JSON events when
//! reassembling.

use serde_json::Value;

/// Split a buffered SSE byte stream into its non-blank lines.
///
/// Handles both LF and CRLF line endings. Invalid UTF-8 is replaced rather
/// than dropped so a corrupt chunk cannot lose the rest of the stream.
pub fn split_sse_lines(buf: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(buf)
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract the payload of a `data:` line, skipping the `[DONE]` sentinel.
pub fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    if rest == "[DONE]" {
        None
    } else {
        Some(rest)
    }
}

/// JSON-decode every `data:` payload, skipping sentinels and undecodable
/// payloads (a truncated final event must not fail the whole reassembly).
pub fn parse_data_events(lines: &[String]) -> Vec<Value> {
    lines
        .iter()
        .filter_map(|line| data_payload(line))
        .filter_map(|payload| serde_json::from_str(payload).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_sse_lines_crlf() {
        let buf = b"event: message\r\ndata: {\"a\":1}\r\n\r\ndata: [DONE]\r\n";
        let lines = split_sse_lines(buf);
        assert_eq!(
            lines,
            vec!["event: message", "data: {\"a\":1}", "data: [DONE]"]
        );
    }

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(data_payload("data:{\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(data_payload("data: [DONE]"), None);
        assert_eq!(data_payload("event: ping"), None);
    }

    #[test]
    fn test_parse_data_events_skips_truncated() {
        let lines = vec![
            "data: {\"a\":1}".to_string(),
            "data: {\"b\":".to_string(),
            "data: [DONE]".to_string(),
        ];
        let events = parse_data_events(&lines);
        assert_eq!(events, vec![json!({"a": 1})]);
    }
}
