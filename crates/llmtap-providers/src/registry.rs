use crate::{ClaudeAdapter, Error, FormatAdapter, GeminiAdapter, OpenAiAdapter, Result};
use crate::sse::parse_data_events;
use llmtap_types::CaptureRecord;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// API format selector. `Auto` sniffs each record through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiFormat {
    #[default]
    Auto,
    Openai,
    Claude,
    Gemini,
}

impl ApiFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFormat::Auto => "auto",
            ApiFormat::Openai => "openai",
            ApiFormat::Claude => "claude",
            ApiFormat::Gemini => "gemini",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(ApiFormat::Auto),
            "openai" => Ok(ApiFormat::Openai),
            "claude" => Ok(ApiFormat::Claude),
            "gemini" => Ok(ApiFormat::Gemini),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Ordered adapter registry. More specific formats detect first; OpenAI is
/// the fallback for anything that still looks like a chat payload.
pub struct AdapterRegistry {
    gemini: GeminiAdapter,
    claude: ClaudeAdapter,
    openai: OpenAiAdapter,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            gemini: GeminiAdapter,
            claude: ClaudeAdapter,
            openai: OpenAiAdapter,
        }
    }

    fn adapters(&self) -> [&dyn FormatAdapter; 3] {
        [&self.gemini, &self.claude, &self.openai]
    }

    /// Select the adapter for a record, honoring a forced format.
    pub fn select(
        &self,
        format: ApiFormat,
        record: &CaptureRecord,
    ) -> Result<&dyn FormatAdapter> {
        match format {
            ApiFormat::Openai => Ok(&self.openai),
            ApiFormat::Claude => Ok(&self.claude),
            ApiFormat::Gemini => Ok(&self.gemini),
            ApiFormat::Auto => self
                .adapters()
                .into_iter()
                .find(|adapter| adapter.detect(record))
                .ok_or_else(|| {
                    Error::UnsupportedFormat(format!(
                        "record {}: no adapter recognizes this payload",
                        record.id
                    ))
                }),
        }
    }

    /// Reassemble a buffered SSE capture by sniffing the event shape.
    /// Used by the proxy when eager reassembly is enabled.
    pub fn reassemble_capture(&self, sse_lines: &[String]) -> Result<Value> {
        for event in parse_data_events(sse_lines) {
            if event.get("type").is_some() {
                return self.claude.reassemble_stream(sse_lines);
            }
            if event.get("candidates").is_some() {
                return self.gemini.reassemble_stream(sse_lines);
            }
            if event.get("choices").is_some() {
                return self.openai.reassemble_stream(sse_lines);
            }
        }
        Err(Error::UnsupportedFormat(
            "stream events match no known format".to_string(),
        ))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{record_with, streamed_response};
    use serde_json::json;

    #[test]
    fn test_auto_detection_order() {
        let registry = AdapterRegistry::new();

        let gemini = record_with(json!({"contents": []}), None);
        assert_eq!(registry.select(ApiFormat::Auto, &gemini).unwrap().name(), "gemini");

        let claude = record_with(
            json!({"system": [{"type": "text", "text": "x"}], "messages": []}),
            None,
        );
        assert_eq!(registry.select(ApiFormat::Auto, &claude).unwrap().name(), "claude");

        let openai = record_with(
            json!({"messages": [{"role": "user", "content": "hi"}]}),
            None,
        );
        assert_eq!(registry.select(ApiFormat::Auto, &openai).unwrap().name(), "openai");
    }

    #[test]
    fn test_forced_format_skips_detection() {
        let registry = AdapterRegistry::new();
        let record = record_with(json!({"contents": []}), None);
        assert_eq!(
            registry.select(ApiFormat::Claude, &record).unwrap().name(),
            "claude"
        );
    }

    #[test]
    fn test_unrecognized_payload_is_unsupported() {
        let registry = AdapterRegistry::new();
        let record = record_with(json!({"input": [1, 2, 3]}), None);
        assert!(matches!(
            registry.select(ApiFormat::Auto, &record),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_reassemble_capture_sniffs_format() {
        let registry = AdapterRegistry::new();
        let record = record_with(
            json!({}),
            Some(streamed_response(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}",
            ])),
        );
        let lines = record.response.unwrap().sse_lines;
        let value = registry.reassemble_capture(&lines).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], json!("hi"));
    }
}
