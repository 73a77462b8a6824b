//! The cook pipeline: raw capture records in, viewer bundle out.
//!
//! Each record is routed through its format adapter, its messages and tools
//! are interned, and the resulting request list is linked into a dependency
//! forest. Records the adapters cannot handle are skipped with a diagnostic,
//! never aborting the run.

use crate::dependency;
use crate::error::Result;
use crate::intern::Interner;
use llmtap_providers::{normalize_record, AdapterRegistry, ApiFormat};
use llmtap_types::{CaptureRecord, RequestNode, TraceBundle};
use serde_json::Value;
use std::path::Path;

/// Result of a cook run: the bundle plus diagnostics for skipped records.
pub struct CookOutcome {
    pub bundle: TraceBundle,
    pub skipped: Vec<String>,
}

pub struct Cooker {
    registry: AdapterRegistry,
    format: ApiFormat,
    interner: Interner,
    requests: Vec<RequestNode>,
    skipped: Vec<String>,
}

impl Cooker {
    pub fn new(format: ApiFormat) -> Self {
        Self {
            registry: AdapterRegistry::new(),
            format,
            interner: Interner::new(),
            requests: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Normalize and intern one record. Unsupported or malformed records are
    /// recorded as diagnostics and dropped.
    pub fn push_record(&mut self, record: &CaptureRecord) {
        let adapter = match self.registry.select(self.format, record) {
            Ok(adapter) => adapter,
            Err(err) => {
                self.skipped.push(format!("record {}: {}", record.id, err));
                return;
            }
        };
        let normalized = match normalize_record(adapter, record) {
            Ok(normalized) => normalized,
            Err(err) => {
                self.skipped.push(format!("record {}: {}", record.id, err));
                return;
            }
        };

        let request_messages = normalized
            .request_messages
            .into_iter()
            .map(|draft| self.interner.intern_message(draft))
            .collect();
        let response_messages = normalized
            .response_messages
            .into_iter()
            .map(|draft| self.interner.intern_message(draft))
            .collect();
        let tools = normalized
            .tools
            .into_iter()
            .map(|draft| self.interner.intern_tool(draft))
            .collect();

        self.requests.push(RequestNode {
            id: record.id.clone(),
            parent_id: None,
            timestamp: record.timestamp_ms(),
            request_messages,
            response_messages,
            model: normalized.model,
            tools,
            duration_ms: record.duration_ms,
        });
    }

    /// Sort by timestamp, link the forest, and assemble the bundle.
    pub fn finish(mut self) -> CookOutcome {
        self.requests.sort_by_key(|request| request.timestamp);
        dependency::analyze(&mut self.requests);
        let (messages, tools) = self.interner.into_parts();
        CookOutcome {
            bundle: TraceBundle {
                messages,
                tools,
                requests: self.requests,
            },
            skipped: self.skipped,
        }
    }
}

/// Cook a slice of records end to end.
pub fn cook(records: &[CaptureRecord], format: ApiFormat) -> CookOutcome {
    let mut cooker = Cooker::new(format);
    for record in records {
        cooker.push_record(record);
    }
    cooker.finish()
}

/// Parse capture input: line-delimited JSON, or a whole-file JSON array /
/// single object. JSONL readers stop at the last newline so an in-progress
/// file's trailing partial line is tolerated; undecodable lines become
/// diagnostics.
pub fn parse_records(content: &str) -> (Vec<CaptureRecord>, Vec<String>) {
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();

    if let Ok(value) = serde_json::from_str::<Value>(content) {
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        for (idx, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<CaptureRecord>(item) {
                Ok(record) => records.push(record),
                Err(err) => diagnostics.push(format!("entry {}: malformed record: {}", idx, err)),
            }
        }
        return (records, diagnostics);
    }

    let complete = match content.rfind('\n') {
        Some(pos) => &content[..pos],
        None => "",
    };
    for (lineno, line) in complete.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CaptureRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                diagnostics.push(format!("line {}: malformed record: {}", lineno + 1, err))
            }
        }
    }
    (records, diagnostics)
}

/// Load capture records from a file.
pub fn load_records(path: &Path) -> Result<(Vec<CaptureRecord>, Vec<String>)> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_records(&content))
}

/// Load a trace file for viewing: an already-cooked bundle is passed through
/// verbatim, anything else is cooked with auto-detection.
pub fn load_or_cook(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    if let Ok(value) = serde_json::from_str::<Value>(&content) {
        if TraceBundle::looks_like_bundle(&value) {
            return Ok(value);
        }
    }
    let (records, _) = parse_records(&content);
    let outcome = cook(&records, ApiFormat::Auto);
    Ok(serde_json::to_value(outcome.bundle)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records_tolerates_partial_trailing_line() {
        let content = concat!(
            r#"{"id":"r1","timestamp":"2024-01-01T00:00:00Z","request":{"url":"/v1","method":"POST","body":{"messages":[]}}}"#,
            "\n",
            r#"{"id":"r2","timestamp":"2024-01-01T00:0"#,
        );
        let (records, diagnostics) = parse_records(content);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "r1");
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_parse_records_json_array() {
        let content = r#"[
            {"id":"r1","timestamp":"2024-01-01T00:00:00Z","request":{"url":"/v1","method":"POST","body":{"messages":[]}}}
        ]"#;
        let (records, diagnostics) = parse_records(content);
        assert_eq!(records.len(), 1);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_parse_records_reports_malformed_lines() {
        let content = "{\"id\":\"r1\",\"timestamp\":\"t\",\"request\":{\"url\":\"/\",\"method\":\"POST\",\"body\":{}}}\nnot json\n";
        let (records, diagnostics) = parse_records(content);
        assert_eq!(records.len(), 1);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("line 2"));
    }
}
