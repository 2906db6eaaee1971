//! Source discovery: native, network fallback and synthetic modes

pub mod engine;
pub mod state;

pub use engine::DiscoveryEngine;
pub use state::{DiscoveryMode, DiscoveryStats, ScanProgress, ScanState};
