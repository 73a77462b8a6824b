use std::fmt;

/// Result type for llmtap-providers operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the adapter layer
#[derive(Debug)]
pub enum Error {
    /// JSON parsing failed
    Json(serde_json::Error),

    /// No adapter recognizes the record's format
    UnsupportedFormat(String),

    /// Record is missing required structure (e.g. non-object request body)
    MalformedRecord(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            Error::MalformedRecord(msg) => write!(f, "malformed record: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(err) => Some(err),
            Error::UnsupportedFormat(_) | Error::MalformedRecord(_) => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}
