use llmtap_engine::{cook, parse_records, ApiFormat};
use llmtap_types::{CaptureRecord, CapturedRequest, CapturedResponse, Role};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn openai_record(id: &str, timestamp: &str, request_body: Value, response_body: Value) -> CaptureRecord {
    CaptureRecord {
        id: id.to_string(),
        timestamp: timestamp.to_string(),
        request: CapturedRequest {
            url: "/v1/chat/completions".to_string(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: request_body,
        },
        response: Some(CapturedResponse::whole(200, BTreeMap::new(), response_body)),
        duration_ms: 42,
        error: None,
    }
}

fn chat_request(model: &str, turns: &[(&str, &str)]) -> Value {
    let messages: Vec<Value> = turns
        .iter()
        .map(|(role, content)| json!({"role": role, "content": content}))
        .collect();
    json!({"model": model, "messages": messages})
}

fn chat_response(content: &str) -> Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

/// A three-turn conversation growing linearly: each request replays the
/// previous exchange and appends a new user turn.
fn linear_conversation() -> Vec<CaptureRecord> {
    vec![
        openai_record(
            "r1",
            "2024-01-01T10:00:00Z",
            chat_request("gpt-4", &[("user", "hi")]),
            chat_response("hello"),
        ),
        openai_record(
            "r2",
            "2024-01-01T10:01:00Z",
            chat_request(
                "gpt-4",
                &[("user", "hi"), ("assistant", "hello"), ("user", "more")],
            ),
            chat_response("sure"),
        ),
        openai_record(
            "r3",
            "2024-01-01T10:02:00Z",
            chat_request(
                "gpt-4",
                &[
                    ("user", "hi"),
                    ("assistant", "hello"),
                    ("user", "more"),
                    ("assistant", "sure"),
                    ("user", "thanks"),
                ],
            ),
            chat_response("np"),
        ),
    ]
}

#[test]
fn test_linear_dependency_chain() {
    let outcome = cook(&linear_conversation(), ApiFormat::Auto);
    assert!(outcome.skipped.is_empty());

    let requests = &outcome.bundle.requests;
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].parent_id, None);
    assert_eq!(requests[1].parent_id.as_deref(), Some("r1"));
    assert_eq!(requests[2].parent_id.as_deref(), Some("r2"));
}

#[test]
fn test_messages_dedupe_across_requests() {
    let outcome = cook(&linear_conversation(), ApiFormat::Auto);

    // "hi" appears in all three requests but is stored once
    let hi_count = outcome
        .bundle
        .messages
        .iter()
        .filter(|m| m.content == "hi" && m.role == Role::User)
        .count();
    assert_eq!(hi_count, 1);

    // Every id referenced from a request resolves in the bundle
    let known: std::collections::HashSet<&str> = outcome
        .bundle
        .messages
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    for request in &outcome.bundle.requests {
        for id in request
            .request_messages
            .iter()
            .chain(request.response_messages.iter())
        {
            assert!(known.contains(id.as_str()), "dangling message id {}", id);
        }
    }
}

#[test]
fn test_rewind_branches_from_earlier_request() {
    let mut records = linear_conversation();
    // r3 rewinds to r1's continuation instead of r2's
    records[2] = openai_record(
        "r3",
        "2024-01-01T10:02:00Z",
        chat_request(
            "gpt-4",
            &[("user", "hi"), ("assistant", "hello"), ("user", "actually...")],
        ),
        chat_response("ok"),
    );
    let outcome = cook(&records, ApiFormat::Auto);

    let r3 = outcome.bundle.requests.iter().find(|r| r.id == "r3").unwrap();
    assert_eq!(r3.parent_id.as_deref(), Some("r1"));
}

#[test]
fn test_cross_model_split() {
    let records = vec![
        openai_record(
            "r1",
            "2024-01-01T10:00:00Z",
            chat_request("gpt-4", &[("user", "hi")]),
            chat_response("hello"),
        ),
        openai_record(
            "r2",
            "2024-01-01T10:01:00Z",
            chat_request("gpt-4o", &[("user", "hi"), ("assistant", "hello"), ("user", "more")]),
            chat_response("sure"),
        ),
    ];
    let outcome = cook(&records, ApiFormat::Auto);
    let r2 = outcome.bundle.requests.iter().find(|r| r.id == "r2").unwrap();
    assert_eq!(r2.parent_id, None);
}

#[test]
fn test_cook_is_deterministic() {
    let records = linear_conversation();
    let first = serde_json::to_string(&cook(&records, ApiFormat::Auto).bundle).unwrap();
    let second = serde_json::to_string(&cook(&records, ApiFormat::Auto).bundle).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_tools_dedupe_and_resolve() {
    let tool = json!({
        "type": "function",
        "function": {"name": "lookup", "description": "d", "parameters": {"type": "object"}},
    });
    let mut request1 = chat_request("gpt-4", &[("user", "hi")]);
    request1["tools"] = json!([tool]);
    let mut request2 = chat_request("gpt-4", &[("user", "hi"), ("assistant", "hello"), ("user", "go")]);
    request2["tools"] = json!([tool]);

    let records = vec![
        openai_record("r1", "2024-01-01T10:00:00Z", request1, chat_response("hello")),
        openai_record("r2", "2024-01-01T10:01:00Z", request2, chat_response("done")),
    ];
    let outcome = cook(&records, ApiFormat::Auto);

    assert_eq!(outcome.bundle.tools.len(), 1);
    let tool_id = &outcome.bundle.tools[0].id;
    for request in &outcome.bundle.requests {
        assert_eq!(request.tools, vec![tool_id.clone()]);
    }
}

#[test]
fn test_unsupported_records_skip_without_aborting() {
    let mut records = linear_conversation();
    records.insert(
        1,
        CaptureRecord {
            id: "weird".to_string(),
            timestamp: "2024-01-01T10:00:30Z".to_string(),
            request: CapturedRequest {
                url: "/v1/embeddings".to_string(),
                method: "POST".to_string(),
                headers: BTreeMap::new(),
                body: json!({"input": "embed me"}),
            },
            response: None,
            duration_ms: 1,
            error: None,
        },
    );
    let outcome = cook(&records, ApiFormat::Auto);
    assert_eq!(outcome.bundle.requests.len(), 3);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.skipped[0].contains("weird"));
}

#[test]
fn test_mixed_format_file_auto_detects_per_record() {
    let claude = CaptureRecord {
        id: "c1".to_string(),
        timestamp: "2024-01-01T11:00:00Z".to_string(),
        request: CapturedRequest {
            url: "/v1/messages".to_string(),
            method: "POST".to_string(),
            headers: BTreeMap::new(),
            body: json!({
                "model": "claude-3-5-sonnet",
                "system": [{"type": "text", "text": "be terse"}],
                "messages": [{"role": "user", "content": "hi"}],
            }),
        },
        response: Some(CapturedResponse::whole(
            200,
            BTreeMap::new(),
            json!({"content": [{"type": "text", "text": "hey"}]}),
        )),
        duration_ms: 10,
        error: None,
    };
    let mut records = linear_conversation();
    records.push(claude);

    let outcome = cook(&records, ApiFormat::Auto);
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.bundle.requests.len(), 4);

    let claude_request = outcome.bundle.requests.iter().find(|r| r.id == "c1").unwrap();
    assert_eq!(claude_request.model, "claude-3-5-sonnet");
    // The lifted system message leads the request sequence
    let first_message = outcome
        .bundle
        .messages
        .iter()
        .find(|m| m.id == claude_request.request_messages[0])
        .unwrap();
    assert_eq!(first_message.role, Role::System);
}

#[test]
fn test_load_records_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.jsonl");
    let log: String = linear_conversation()
        .iter()
        .map(|r| serde_json::to_string(r).unwrap() + "\n")
        .collect();
    std::fs::write(&path, log).unwrap();

    let (records, diagnostics) = llmtap_engine::load_records(&path).unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(records.len(), 3);

    assert!(llmtap_engine::load_records(&dir.path().join("absent.jsonl")).is_err());
}

#[test]
fn test_roundtrip_through_capture_log_text() {
    let records = linear_conversation();
    let log: String = records
        .iter()
        .map(|r| serde_json::to_string(r).unwrap() + "\n")
        .collect();
    let (parsed, diagnostics) = parse_records(&log);
    assert!(diagnostics.is_empty());
    assert_eq!(parsed.len(), 3);

    let outcome = cook(&parsed, ApiFormat::Auto);
    assert_eq!(outcome.bundle.requests[2].parent_id.as_deref(), Some("r2"));
}
