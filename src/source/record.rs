//! Discovered source records

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Name of the record published while a sweep has not found anything yet
pub const PLACEHOLDER_NAME: &str = "Scanning for sources…";

/// Stream format advertised by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SourceKind {
    #[default]
    Standard,
    CompressedHx2,
    CompressedHx3,
    Unknown,
}

impl SourceKind {
    /// Kind implied by the port a source answered on
    pub fn from_port(port: u16) -> Self {
        match port {
            5961 => SourceKind::CompressedHx2,
            5962 => SourceKind::CompressedHx3,
            _ => SourceKind::Standard,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceKind::Standard => "Standard",
            SourceKind::CompressedHx2 => "HX2",
            SourceKind::CompressedHx3 => "HX3",
            SourceKind::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Connection state shared by source records and the receive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Disconnecting,
    ConnectionFailed,
    NetworkError,
    SourceUnavailable,
}

impl ConnectionStatus {
    /// Connected, with or without an active frame loop
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Streaming)
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::ConnectionFailed
                | ConnectionStatus::NetworkError
                | ConnectionStatus::SourceUnavailable
        )
    }
}

/// A source observed on the network. `name` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub name: String,
    pub machine_name: String,
    /// `host:port`, or the raw machine info when no address could be derived
    pub address: String,
    pub kind: SourceKind,
    pub status: ConnectionStatus,
    /// Which discovery path produced the record
    pub description: String,
    #[serde(skip)]
    pub first_seen: Instant,
    #[serde(skip)]
    pub last_seen: Instant,
    pub is_online: bool,
    pub video_width: Option<u32>,
    pub video_height: Option<u32>,
    pub frame_rate: Option<f32>,
}

impl SourceRecord {
    pub fn new(
        name: impl Into<String>,
        machine_name: impl Into<String>,
        address: impl Into<String>,
        kind: SourceKind,
        now: Instant,
    ) -> Self {
        Self {
            name: name.into(),
            machine_name: machine_name.into(),
            address: address.into(),
            kind,
            status: ConnectionStatus::Disconnected,
            description: String::new(),
            first_seen: now,
            last_seen: now,
            is_online: true,
            video_width: None,
            video_height: None,
            frame_rate: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = status;
        self
    }

    /// The record shown while nothing has been found yet
    pub fn placeholder(now: Instant) -> Self {
        Self::new(PLACEHOLDER_NAME, "network scan", "scanning…", SourceKind::Standard, now)
            .with_status(ConnectionStatus::Connecting)
            .with_description("Searching the local network for sources")
    }

    pub fn is_placeholder(&self) -> bool {
        self.name == PLACEHOLDER_NAME
    }

    /// `NAME (MACHINE)`, or just the name when the machine is not known
    pub fn display_name(&self) -> String {
        if self.machine_name.is_empty() || self.machine_name == "unknown" {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.machine_name)
        }
    }

    /// Resolution if negotiated, else frame rate, else the kind
    pub fn short_description(&self) -> String {
        match (self.video_width, self.video_height, self.frame_rate) {
            (Some(w), Some(h), _) if w > 0 && h > 0 => format!("{}x{}", w, h),
            (_, _, Some(fps)) if fps > 0.0 => format!("{}fps", fps),
            _ => self.kind.to_string(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.is_online && self.status != ConnectionStatus::SourceUnavailable
    }

    /// Host part of `address`
    pub fn host(&self) -> &str {
        match self.address.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host,
            _ => &self.address,
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.address.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
    }

    /// True once `timeout` has passed since the source was last seen
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    /// Fold a newer observation of the same source into this record.
    ///
    /// Identity and liveness come from the observation; `first_seen`, the
    /// connection status and any negotiated video format are kept. A source
    /// marked unavailable that is seen online again goes back to
    /// `Disconnected`.
    pub fn merge_observation(&mut self, observed: SourceRecord) {
        debug_assert_eq!(self.name, observed.name);
        self.machine_name = observed.machine_name;
        self.address = observed.address;
        self.kind = observed.kind;
        self.description = observed.description;
        self.first_seen = self.first_seen.min(observed.first_seen);
        self.last_seen = self.last_seen.max(observed.last_seen);
        self.is_online = observed.is_online;
        if self.is_online && self.status == ConnectionStatus::SourceUnavailable {
            self.status = ConnectionStatus::Disconnected;
        }
        if observed.video_width.is_some() {
            self.video_width = observed.video_width;
            self.video_height = observed.video_height;
        }
        if observed.frame_rate.is_some() {
            self.frame_rate = observed.frame_rate;
        }
    }
}

/// Collapse records sharing a name into one, keeping first-appearance order
pub fn dedup_by_name(records: impl IntoIterator<Item = SourceRecord>) -> Vec<SourceRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<SourceRecord> = Vec::new();

    for record in records {
        match index.get(&record.name) {
            Some(&i) => out[i].merge_observation(record),
            None => {
                index.insert(record.name.clone(), out.len());
                out.push(record);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, address: &str) -> SourceRecord {
        SourceRecord::new(name, "MACHINE", address, SourceKind::Standard, Instant::now())
    }

    #[test]
    fn test_display_name() {
        let r = record("PGM", "10.0.0.5:5960");
        assert_eq!(r.display_name(), "PGM (MACHINE)");

        let mut r = r;
        r.machine_name = "unknown".into();
        assert_eq!(r.display_name(), "PGM");
    }

    #[test]
    fn test_short_description_precedence() {
        let mut r = record("PGM", "10.0.0.5:5960");
        assert_eq!(r.short_description(), "Standard");

        r.frame_rate = Some(30.0);
        assert_eq!(r.short_description(), "30fps");

        r.video_width = Some(1920);
        r.video_height = Some(1080);
        assert_eq!(r.short_description(), "1920x1080");
    }

    #[test]
    fn test_host_and_port() {
        let r = record("PGM", "192.168.1.21:5961");
        assert_eq!(r.host(), "192.168.1.21");
        assert_eq!(r.port(), Some(5961));

        let r = record("PGM", "STUDIO-PC");
        assert_eq!(r.host(), "STUDIO-PC");
        assert_eq!(r.port(), None);
    }

    #[test]
    fn test_availability() {
        let mut r = record("PGM", "10.0.0.5:5960");
        assert!(r.is_available());

        r.status = ConnectionStatus::SourceUnavailable;
        assert!(!r.is_available());

        r.status = ConnectionStatus::Disconnected;
        r.is_online = false;
        assert!(!r.is_available());
    }

    #[test]
    fn test_kind_from_port() {
        assert_eq!(SourceKind::from_port(5960), SourceKind::Standard);
        assert_eq!(SourceKind::from_port(5961), SourceKind::CompressedHx2);
        assert_eq!(SourceKind::from_port(5962), SourceKind::CompressedHx3);
        assert_eq!(SourceKind::from_port(8080), SourceKind::Standard);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let r = record("PGM", "10.0.0.5:5960");
        let timeout = Duration::from_secs(12);
        assert!(!r.is_expired(Instant::now(), timeout));

        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(!r.is_expired(Instant::now(), timeout));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(r.is_expired(Instant::now(), timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_merges_same_name() {
        let first = record("PGM", "10.0.0.5:5960").with_status(ConnectionStatus::Connected);
        tokio::time::advance(Duration::from_secs(2)).await;
        let later = record("PGM", "10.0.0.6:5960");
        let other = record("PREVIEW", "10.0.0.5:5961");

        let merged = dedup_by_name(vec![first.clone(), other, later.clone()]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "PGM");
        assert_eq!(merged[0].address, "10.0.0.6:5960");
        assert_eq!(merged[0].first_seen, first.first_seen);
        assert_eq!(merged[0].last_seen, later.last_seen);
        assert_eq!(merged[0].status, ConnectionStatus::Connected);
        assert_eq!(merged[1].name, "PREVIEW");
    }

    #[test]
    fn test_unavailable_source_seen_again_is_reset() {
        let mut r = record("PGM", "10.0.0.5:5960");
        r.is_online = false;
        r.status = ConnectionStatus::SourceUnavailable;

        r.merge_observation(record("PGM", "10.0.0.5:5960"));
        assert!(r.is_available());
        assert_eq!(r.status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_placeholder() {
        let p = SourceRecord::placeholder(Instant::now());
        assert!(p.is_placeholder());
        assert_eq!(p.status, ConnectionStatus::Connecting);
        assert!(!record("PGM", "x").is_placeholder());
    }
}
