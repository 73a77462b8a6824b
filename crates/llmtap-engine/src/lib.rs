pub mod cooker;
pub mod dependency;
pub mod intern;

mod error;

pub use cooker::{cook, load_or_cook, load_records, parse_records, CookOutcome, Cooker};
pub use error::{Error, Result};
pub use intern::{message_id, tool_id, Interner};

// Re-export the format selector so callers need not depend on the adapter
// crate directly.
pub use llmtap_providers::ApiFormat;
