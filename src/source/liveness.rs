//! Per-source liveness and connection statistics
//!
//! Trackers are keyed by source name and are never removed while the
//! process runs (only marked offline), so statistics outlive the
//! source's presence in the published list.

use dashmap::DashMap;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

/// Liveness and connection history of one source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLivenessTracker {
    pub is_online: bool,
    pub first_seen: Instant,
    pub last_seen: Instant,
    pub connection_attempts: u32,
    pub successful_connections: u32,
    pub last_connection_at: Option<Instant>,
    pub average_latency_ms: f32,
    pub last_error: Option<String>,
}

impl SourceLivenessTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            is_online: false,
            first_seen: now,
            last_seen: now,
            connection_attempts: 0,
            successful_connections: 0,
            last_connection_at: None,
            average_latency_ms: 0.0,
            last_error: None,
        }
    }

    pub fn update_seen(&mut self, now: Instant) {
        self.last_seen = now;
        self.is_online = true;
    }

    pub fn mark_offline(&mut self) {
        self.is_online = false;
    }

    pub fn record_connection_attempt(&mut self, now: Instant) {
        self.connection_attempts += 1;
        self.last_connection_at = Some(now);
    }

    pub fn record_successful_connection(&mut self) {
        self.successful_connections += 1;
    }

    /// Recency-weighted: the first sample is taken as is, later samples
    /// are averaged with the current value.
    pub fn update_latency(&mut self, latency_ms: f32) {
        self.average_latency_ms = if self.average_latency_ms == 0.0 {
            latency_ms
        } else {
            (self.average_latency_ms + latency_ms) / 2.0
        };
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn success_rate(&self) -> f32 {
        if self.connection_attempts > 0 {
            self.successful_connections as f32 / self.connection_attempts as f32
        } else {
            0.0
        }
    }

    /// Time between first and last sighting
    pub fn online_duration(&self) -> Duration {
        self.last_seen.saturating_duration_since(self.first_seen)
    }

    pub fn is_offline_longer_than(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Concurrent map of trackers, written by the scan loop and read anywhere
#[derive(Debug, Default)]
pub struct LivenessTable {
    entries: DashMap<String, SourceLivenessTracker>,
}

impl LivenessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `name` as seen at `now`, creating its tracker on first sight
    pub fn observe(&self, name: &str, now: Instant) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| SourceLivenessTracker::new(now))
            .update_seen(now);
    }

    /// Apply one discovery pass: every name in `seen` is online at `now`,
    /// every other known name goes offline.
    pub fn reconcile(&self, seen: &HashSet<String>, now: Instant) {
        for name in seen {
            self.observe(name, now);
        }

        for mut entry in self.entries.iter_mut() {
            if !seen.contains(entry.key()) && entry.is_online {
                tracing::debug!("Source {} went offline", entry.key());
                entry.mark_offline();
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<SourceLivenessTracker> {
        self.entries.get(name).map(|entry| entry.clone())
    }

    pub fn first_seen(&self, name: &str) -> Option<Instant> {
        self.entries.get(name).map(|entry| entry.first_seen)
    }

    pub fn record_connection_attempt(&self, name: &str, now: Instant) {
        self.entries
            .entry(name.to_string())
            .or_insert_with(|| SourceLivenessTracker::new(now))
            .record_connection_attempt(now);
    }

    pub fn record_successful_connection(&self, name: &str, latency: Duration) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.record_successful_connection();
            entry.update_latency(latency.as_secs_f32() * 1000.0);
        }
    }

    pub fn record_error(&self, name: &str, error: impl Into<String>) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.record_error(error);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_online).count()
    }

    /// Copy of every tracker, sorted by name
    pub fn snapshot(&self) -> Vec<(String, SourceLivenessTracker)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
