//! Runtime configuration
//!
//! Every knob has a default taken from [`crate::constants`]; a TOML file
//! only needs to name the values it overrides. Durations are milliseconds.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub discovery: DiscoveryConfig,
    pub probe: ProbeConfig,
    pub receiver: ReceiverConfig,
}

/// Discovery engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub scan_interval_ms: u64,
    pub native_find_timeout_ms: u64,
    pub fallback_cooldown_ms: u64,
    pub source_timeout_ms: u64,
    /// Skip native and network discovery and publish placeholder sources
    pub synthetic: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            native_find_timeout_ms: DEFAULT_NATIVE_FIND_TIMEOUT_MS,
            fallback_cooldown_ms: DEFAULT_FALLBACK_COOLDOWN_MS,
            source_timeout_ms: DEFAULT_SOURCE_TIMEOUT_MS,
            synthetic: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn native_find_timeout(&self) -> Duration {
        Duration::from_millis(self.native_find_timeout_ms)
    }

    pub fn fallback_cooldown(&self) -> Duration {
        Duration::from_millis(self.fallback_cooldown_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

/// Network probe settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub ports: Vec<u16>,
    pub port_timeout_ms: u64,
    pub host_budget_ms: u64,
    pub curated_octets: Vec<u8>,
    pub neighbour_span: u8,
    /// Sweep around this address instead of the first usable interface
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<Ipv4Addr>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PROBE_PORTS.to_vec(),
            port_timeout_ms: DEFAULT_PORT_TIMEOUT_MS,
            host_budget_ms: DEFAULT_HOST_BUDGET_MS,
            curated_octets: CURATED_HOST_OCTETS.to_vec(),
            neighbour_span: DEFAULT_NEIGHBOUR_SPAN,
            local_address: None,
        }
    }
}

impl ProbeConfig {
    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }

    pub fn host_budget(&self) -> Duration {
        Duration::from_millis(self.host_budget_ms)
    }
}

/// Receive session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub pull_timeout_ms: u64,
    pub empty_pull_backoff_ms: u64,
    pub error_backoff_ms: u64,
    pub simulated_width: u32,
    pub simulated_height: u32,
    pub simulated_frame_rate: f32,
    pub frame_buffer_capacity: usize,
    /// Fall back to the simulated stream when the native connect fails.
    /// When false a failed connect ends in `ConnectionFailed`.
    pub simulate_on_failure: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            pull_timeout_ms: DEFAULT_PULL_TIMEOUT_MS,
            empty_pull_backoff_ms: DEFAULT_EMPTY_PULL_BACKOFF_MS,
            error_backoff_ms: DEFAULT_ERROR_BACKOFF_MS,
            simulated_width: SIMULATED_WIDTH,
            simulated_height: SIMULATED_HEIGHT,
            simulated_frame_rate: SIMULATED_FRAME_RATE,
            frame_buffer_capacity: FRAME_BUFFER_CAPACITY,
            simulate_on_failure: true,
        }
    }
}

impl ReceiverConfig {
    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    pub fn empty_pull_backoff(&self) -> Duration {
        Duration::from_millis(self.empty_pull_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Time between two simulated frames. Rates that do not give a
    /// usable period fall back to the default rate.
    pub fn simulated_frame_interval(&self) -> Duration {
        frame_period(self.simulated_frame_rate)
            .unwrap_or_else(|| Duration::from_secs_f32(1.0 / SIMULATED_FRAME_RATE))
    }
}

/// Non-zero period of `rate` frames per second, if representable
fn frame_period(rate: f32) -> Option<Duration> {
    if !rate.is_finite() || rate <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f32(1.0 / rate)
        .ok()
        .filter(|period| !period.is_zero())
}

impl MonitorConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Platform config location, e.g. `~/.config/lan-video-monitor/monitor.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("org", "lan-video-monitor", "lan-video-monitor")
            .map(|dirs| dirs.config_dir().join("monitor.toml"))
    }

    /// Load from `path` (or the platform default) and fall back to defaults
    /// when the file is missing or unreadable
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Self::default(),
        };

        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => {
                tracing::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Reject values that would stall or spin the background loops
    pub fn validate(&self) -> Result<()> {
        let d = &self.discovery;
        if d.scan_interval_ms == 0 {
            return Err(Error::Config("discovery.scan_interval_ms must be > 0".into()));
        }
        if d.source_timeout_ms == 0 {
            return Err(Error::Config("discovery.source_timeout_ms must be > 0".into()));
        }
        if self.probe.ports.is_empty() {
            return Err(Error::Config("probe.ports must not be empty".into()));
        }
        if self.probe.port_timeout_ms == 0 || self.probe.host_budget_ms == 0 {
            return Err(Error::Config("probe timeouts must be > 0".into()));
        }
        if let Some(octet) = self.probe.curated_octets.iter().find(|o| !(1..=254).contains(*o)) {
            return Err(Error::Config(format!(
                "probe.curated_octets: {} is not a host octet",
                octet
            )));
        }
        let r = &self.receiver;
        if r.simulated_width == 0 || r.simulated_height == 0 {
            return Err(Error::Config("receiver simulated geometry must be non-zero".into()));
        }
        if frame_period(r.simulated_frame_rate).is_none() {
            return Err(Error::Config(
                "receiver.simulated_frame_rate must be a positive, finite rate".into(),
            ));
        }
        if r.frame_buffer_capacity == 0 {
            return Err(Error::Config("receiver.frame_buffer_capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.scan_interval(), Duration::from_secs(3));
        assert_eq!(config.discovery.source_timeout(), Duration::from_secs(12));
        assert_eq!(config.probe.ports, vec![5960, 5961, 5962, 5963, 80, 8080]);
        assert!(config.receiver.simulate_on_failure);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MonitorConfig::from_toml(
            r#"
            [discovery]
            synthetic = true
            source_timeout_ms = 15000

            [receiver]
            simulated_width = 320
            "#,
        )
        .unwrap();

        assert!(config.discovery.synthetic);
        assert_eq!(config.discovery.source_timeout_ms, 15_000);
        assert_eq!(config.discovery.scan_interval_ms, DEFAULT_SCAN_INTERVAL_MS);
        assert_eq!(config.receiver.simulated_width, 320);
        assert_eq!(config.receiver.simulated_height, SIMULATED_HEIGHT);
        assert_eq!(config.probe, ProbeConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = MonitorConfig::from_toml("[probe]\nports = []\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = MonitorConfig::from_toml("[receiver]\nsimulated_frame_rate = 0.0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = MonitorConfig::from_toml("[probe]\ncurated_octets = [1, 255]\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unusable_frame_rates_rejected() {
        for rate in ["1e30", "inf", "1e-30", "-5.0", "nan"] {
            let text = format!("[receiver]\nsimulated_frame_rate = {}\n", rate);
            let err = MonitorConfig::from_toml(&text).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "rate {} accepted", rate);
        }

        let config = ReceiverConfig {
            simulated_frame_rate: 1e30,
            ..ReceiverConfig::default()
        };
        assert_eq!(
            config.simulated_frame_interval(),
            ReceiverConfig::default().simulated_frame_interval()
        );
    }

    #[test]
    fn test_local_address_override() {
        let config = MonitorConfig::from_toml("[probe]\nlocal_address = \"10.1.2.3\"\n").unwrap();
        assert_eq!(config.probe.local_address, Some(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(MonitorConfig::default().probe.local_address, None);
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = MonitorConfig::load_or_default(Some(Path::new("/nonexistent/monitor.toml")));
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_frame_interval() {
        let config = ReceiverConfig::default();
        let interval = config.simulated_frame_interval();
        assert!(interval > Duration::from_millis(33) && interval < Duration::from_millis(34));
    }
}
