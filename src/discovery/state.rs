//! Observable discovery state

use serde::Serialize;
use std::fmt;

/// Discovery strategy chosen at initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiscoveryMode {
    /// The native library answers "find sources"
    Native,
    /// TCP probing of likely hosts on the local /24
    NetworkFallback,
    /// Fixed placeholder sources, no network traffic
    Synthetic,
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DiscoveryMode::Native => "native",
            DiscoveryMode::NetworkFallback => "network fallback",
            DiscoveryMode::Synthetic => "synthetic",
        };
        f.write_str(label)
    }
}

/// Hosts probed so far in the current sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub checked: usize,
    pub total: usize,
}

impl ScanProgress {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.checked as f32 / self.total as f32
        }
    }
}

/// Scan loop state published next to the source list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanState {
    pub scanning: bool,
    /// Human-readable status line
    pub status: String,
    pub progress: Option<ScanProgress>,
    /// Error of the most recent failed pass, until cleared or a pass succeeds
    pub last_error: Option<String>,
    /// Completed passes, failed ones included
    pub passes: u64,
}

impl Default for ScanState {
    fn default() -> Self {
        Self {
            scanning: false,
            status: "Idle".to_string(),
            progress: None,
            last_error: None,
            passes: 0,
        }
    }
}

/// Snapshot of discovery statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    /// Every name ever observed in this process
    pub total_discovered: usize,
    pub online: usize,
    pub scanning: bool,
    pub initialized: bool,
    pub native_in_use: bool,
    pub fallback_mode: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        assert_eq!(ScanProgress { checked: 0, total: 0 }.fraction(), 0.0);
        assert_eq!(ScanProgress { checked: 5, total: 20 }.fraction(), 0.25);
    }
}
