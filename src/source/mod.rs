//! Source data model: records, liveness tracking, display-name parsing

pub mod liveness;
pub mod parse;
pub mod record;

pub use liveness::{LivenessTable, SourceLivenessTracker};
pub use parse::{parse_display_name, record_from_display_name};
pub use record::{dedup_by_name, ConnectionStatus, SourceKind, SourceRecord};
