//! Discovery engine
//!
//! Owns the scan loop, the liveness table and the published source list.
//! The list is a `watch` channel of immutable snapshots: observers always
//! see a complete list and only the newest one.
//!
//! One pass works the same way in every mode: collect the records seen
//! this time, reconcile them against the liveness table and the previous
//! list, publish. Records that were not seen stay listed as offline until
//! the source timeout has passed since they were last seen.

use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::capability::{self, SharedCapability};
use crate::config::{DiscoveryConfig, ProbeConfig};
use crate::discovery::state::{DiscoveryMode, DiscoveryStats, ScanProgress, ScanState};
use crate::error::{CapabilityError, DiscoveryError};
use crate::network::NetworkProbe;
use crate::source::{
    dedup_by_name, record_from_display_name, ConnectionStatus, LivenessTable, SourceKind,
    SourceRecord,
};

type SourceList = Arc<Vec<SourceRecord>>;

/// Result of the last full network sweep
#[derive(Debug, Default)]
struct SweepCache {
    records: Vec<SourceRecord>,
    swept_at: Option<Instant>,
}

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct EngineInner {
    config: DiscoveryConfig,
    probe: NetworkProbe,
    capability: Option<SharedCapability>,
    /// `None` until `initialize()` ran
    mode: RwLock<Option<DiscoveryMode>>,
    sources_tx: watch::Sender<SourceList>,
    scan_tx: watch::Sender<ScanState>,
    liveness: Arc<LivenessTable>,
    cache: Mutex<SweepCache>,
    task: Mutex<Option<ScanTask>>,
    /// Serializes start, stop and refresh so a loop is joined before the
    /// next one is spawned
    lifecycle: tokio::sync::Mutex<()>,
    active_loops: AtomicUsize,
    peak_loops: AtomicUsize,
}

/// Counts running scan loops for the lifetime of one loop
struct LoopGuard<'a> {
    inner: &'a EngineInner,
}

impl<'a> LoopGuard<'a> {
    fn enter(inner: &'a EngineInner) -> Self {
        let running = inner.active_loops.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_loops.fetch_max(running, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.inner.active_loops.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Produces a continuously refreshed, deduplicated source list
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<EngineInner>,
}

impl DiscoveryEngine {
    pub fn new(
        config: DiscoveryConfig,
        probe: ProbeConfig,
        capability: Option<SharedCapability>,
    ) -> Self {
        let (sources_tx, _) = watch::channel(Arc::new(Vec::new()));
        let (scan_tx, _) = watch::channel(ScanState::default());

        Self {
            inner: Arc::new(EngineInner {
                config,
                probe: NetworkProbe::new(probe),
                capability,
                mode: RwLock::new(None),
                sources_tx,
                scan_tx,
                liveness: Arc::new(LivenessTable::new()),
                cache: Mutex::new(SweepCache::default()),
                task: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                active_loops: AtomicUsize::new(0),
                peak_loops: AtomicUsize::new(0),
            }),
        }
    }

    /// Choose the discovery mode.
    ///
    /// Never fails: when the native library is missing or refuses, the
    /// engine runs in network fallback mode and still reports `true`.
    pub async fn initialize(&self) -> bool {
        if let Some(mode) = self.mode() {
            tracing::debug!("Discovery already initialized ({})", mode);
            return true;
        }

        let mode = if self.inner.config.synthetic {
            DiscoveryMode::Synthetic
        } else {
            match self.init_native().await {
                Ok(()) => DiscoveryMode::Native,
                Err(e @ CapabilityError::Unavailable(_)) => {
                    tracing::info!("{}, using network fallback", e);
                    DiscoveryMode::NetworkFallback
                }
                Err(e) => {
                    tracing::warn!("{}, using network fallback", e);
                    DiscoveryMode::NetworkFallback
                }
            }
        };

        *self.inner.mode.write() = Some(mode);
        self.inner.scan_tx.send_modify(|state| {
            state.status = format!("Ready ({})", mode);
        });
        tracing::info!("Discovery initialized in {} mode", mode);
        true
    }

    async fn init_native(&self) -> Result<(), CapabilityError> {
        let cap = self.inner.native()?;
        if !capability::blocking(cap.clone(), |c| c.initialize_discovery()).await? {
            return Err(CapabilityError::InitFailed("native discovery refused to start".into()));
        }

        match capability::blocking(cap, |c| c.discovery_version()).await {
            Ok(version) => tracing::info!("Native discovery {}", version),
            Err(e) => tracing::debug!("Native discovery version unavailable: {}", e),
        }
        Ok(())
    }

    pub fn mode(&self) -> Option<DiscoveryMode> {
        *self.inner.mode.read()
    }

    pub fn is_initialized(&self) -> bool {
        self.mode().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<SourceList> {
        self.inner.sources_tx.subscribe()
    }

    /// Latest published list
    pub fn sources(&self) -> SourceList {
        self.inner.sources_tx.borrow().clone()
    }

    pub fn find_source(&self, name: &str) -> Option<SourceRecord> {
        self.inner
            .sources_tx
            .borrow()
            .iter()
            .find(|record| record.name == name)
            .cloned()
    }

    pub fn scan_state(&self) -> ScanState {
        self.inner.scan_tx.borrow().clone()
    }

    pub fn subscribe_scan_state(&self) -> watch::Receiver<ScanState> {
        self.inner.scan_tx.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    pub fn liveness(&self) -> Arc<LivenessTable> {
        self.inner.liveness.clone()
    }

    /// Start the periodic scan loop. A no-op when one is already running;
    /// waits for a concurrent stop to finish first.
    pub async fn start_scanning(&self) -> Result<(), DiscoveryError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.start_locked()
    }

    fn start_locked(&self) -> Result<(), DiscoveryError> {
        let Some(mode) = self.mode() else {
            tracing::warn!("start_scanning() called before initialize()");
            return Err(DiscoveryError::NotInitialized);
        };

        let mut task = self.inner.task.lock();
        if task.is_some() {
            tracing::debug!("Scan loop already running");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            inner.run_scan_loop(loop_cancel).await;
        });

        *task = Some(ScanTask { cancel, handle });
        drop(task);

        self.inner.scan_tx.send_modify(|state| {
            state.scanning = true;
            state.status = format!("Scanning ({})", mode);
        });
        tracing::info!("Started scanning in {} mode", mode);
        Ok(())
    }

    /// Cancel the scan loop and wait for it to exit. Safe to repeat.
    pub async fn stop_scanning(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        let task = self.inner.task.lock().take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            tracing::error!("Scan loop terminated abnormally: {}", e);
        }

        self.inner.scan_tx.send_modify(|state| {
            state.scanning = false;
            state.progress = None;
            state.status = "Stopped".to_string();
        });
        tracing::info!("Stopped scanning");
    }

    /// Forget the sweep cache and restart scanning
    pub async fn refresh(&self) -> Result<(), DiscoveryError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked().await;
        *self.inner.cache.lock() = SweepCache::default();
        self.start_locked()
    }

    /// Run a single discovery pass outside the loop
    pub async fn scan_once(&self) -> Result<(), DiscoveryError> {
        self.inner.pass(&CancellationToken::new()).await
    }

    pub fn clear_error(&self) {
        self.inner.scan_tx.send_if_modified(|state| state.last_error.take().is_some());
    }

    pub fn stats(&self) -> DiscoveryStats {
        let mode = self.mode();
        DiscoveryStats {
            total_discovered: self.inner.liveness.len(),
            online: self.inner.liveness.online_count(),
            scanning: self.is_scanning(),
            initialized: mode.is_some(),
            native_in_use: mode == Some(DiscoveryMode::Native),
            fallback_mode: mode == Some(DiscoveryMode::NetworkFallback),
        }
    }

    /// Set the connection status shown for `name`. Returns false if the
    /// source is not in the published list.
    pub fn set_source_status(&self, name: &str, status: ConnectionStatus) -> bool {
        self.inner.sources_tx.send_if_modified(|list| {
            match list.iter().position(|record| record.name == name) {
                Some(i) if list[i].status != status => {
                    Arc::make_mut(list)[i].status = status;
                    true
                }
                _ => false,
            }
        });
        self.inner
            .sources_tx
            .borrow()
            .iter()
            .any(|record| record.name == name)
    }

    /// Tear down the native discovery handle. Call only once scanning stopped.
    pub async fn release_capability(&self) {
        let mode = self.inner.mode.write().take();
        if mode != Some(DiscoveryMode::Native) {
            return;
        }
        if let Some(cap) = self.inner.capability.clone() {
            let result = capability::blocking(cap, |c| {
                c.teardown_discovery();
                Ok(())
            })
            .await;
            match result {
                Ok(()) => tracing::info!("Released native discovery"),
                Err(e) => tracing::warn!("Native discovery teardown failed: {}", e),
            }
        }
    }

    /// Drop every published and cached record and all liveness history
    pub fn clear(&self) {
        self.inner.sources_tx.send_replace(Arc::new(Vec::new()));
        self.inner.scan_tx.send_replace(ScanState::default());
        *self.inner.cache.lock() = SweepCache::default();
        self.inner.liveness.clear();
    }

    /// Scan loops running right now
    pub fn active_scan_loops(&self) -> usize {
        self.inner.active_loops.load(Ordering::SeqCst)
    }

    /// Most scan loops ever observed running at once
    pub fn peak_scan_loops(&self) -> usize {
        self.inner.peak_loops.load(Ordering::SeqCst)
    }
}

impl EngineInner {
    fn native(&self) -> Result<SharedCapability, CapabilityError> {
        self.capability
            .clone()
            .ok_or_else(|| CapabilityError::Unavailable("no native discovery linked".into()))
    }

    async fn run_scan_loop(self: Arc<Self>, cancel: CancellationToken) {
        let _guard = LoopGuard::enter(&self);
        let mut ticker = interval(self.config.scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Errors are recorded in the scan state by `pass`
            let _ = self.pass(&cancel).await;

            if cancel.is_cancelled() {
                break;
            }
        }

        tracing::debug!("Scan loop exited");
    }

    /// One discovery pass, with its outcome recorded in the scan state
    async fn pass(&self, cancel: &CancellationToken) -> Result<(), DiscoveryError> {
        let Some(mode) = *self.mode.read() else {
            return Err(DiscoveryError::NotInitialized);
        };

        let result = match mode {
            DiscoveryMode::Native => self.native_pass().await,
            DiscoveryMode::NetworkFallback => self.fallback_pass(cancel).await,
            DiscoveryMode::Synthetic => {
                self.reconcile(synthetic_sources(Instant::now()), Instant::now());
                Ok(())
            }
        };

        match &result {
            Ok(()) => {
                let count = self
                    .sources_tx
                    .borrow()
                    .iter()
                    .filter(|r| !r.is_placeholder())
                    .count();
                self.scan_tx.send_modify(|state| {
                    state.passes += 1;
                    state.last_error = None;
                    state.progress = None;
                    state.status = format!("Found {} source(s)", count);
                });
            }
            Err(e) => {
                tracing::error!("Discovery pass failed: {}", e);
                let message = e.to_string();
                self.scan_tx.send_modify(|state| {
                    state.passes += 1;
                    state.progress = None;
                    state.status = "Scan failed".to_string();
                    state.last_error = Some(message);
                });
            }
        }
        result
    }

    async fn native_pass(&self) -> Result<(), DiscoveryError> {
        let cap = self.native()?;
        let timeout = self.config.native_find_timeout();

        // Always awaited to completion so the handle is never torn down mid-call
        let names = capability::blocking(cap, move |c| c.find_sources(timeout)).await?;

        let now = Instant::now();
        let records = names
            .iter()
            .map(|display| record_from_display_name(display, now))
            .collect();
        tracing::debug!("Native discovery reported {} source(s)", names.len());
        self.reconcile(records, now);
        Ok(())
    }

    async fn fallback_pass(&self, cancel: &CancellationToken) -> Result<(), DiscoveryError> {
        if let Some(cached) = self.fresh_cache() {
            tracing::debug!(
                "Within sweep cooldown, republishing {} cached source(s)",
                cached.len()
            );
            self.republish(cached);
            return Ok(());
        }

        let Some(local) = self.probe.local_address() else {
            self.reconcile(Vec::new(), Instant::now());
            return Err(DiscoveryError::NoLocalAddress);
        };

        let hosts = self.probe.candidate_hosts(local);
        let total = hosts.len();
        tracing::info!("Sweeping {} host(s) around {}", total, local);
        self.scan_tx.send_modify(|state| {
            state.progress = Some(ScanProgress { checked: 0, total });
            state.status = format!("Probing {} host(s)", total);
        });

        let mut found: Vec<SourceRecord> = Vec::new();
        for (i, host) in hosts.into_iter().enumerate() {
            let records = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                records = self.probe.probe_host(host) => records,
            };

            let hit = !records.is_empty();
            found.extend(records);
            self.scan_tx.send_modify(|state| {
                state.progress = Some(ScanProgress { checked: i + 1, total });
                state.status = format!("Checked {}/{} host(s)", i + 1, total);
            });
            if hit {
                self.publish_partial(&found);
            }
            tokio::task::yield_now().await;
        }

        let found = dedup_by_name(found);
        if !found.is_empty() {
            let mut cache = self.cache.lock();
            cache.records = found.clone();
            cache.swept_at = Some(Instant::now());
        }
        tracing::info!("Sweep finished with {} source(s)", found.len());
        self.reconcile(found, Instant::now());
        Ok(())
    }

    /// Cached sweep result if it is non-empty and younger than the cooldown
    fn fresh_cache(&self) -> Option<Vec<SourceRecord>> {
        let cache = self.cache.lock();
        let swept_at = cache.swept_at?;
        let age = Instant::now().saturating_duration_since(swept_at);
        (age < self.config.fallback_cooldown() && !cache.records.is_empty())
            .then(|| cache.records.clone())
    }

    /// Publish cached records, keeping the status currently shown for each
    fn republish(&self, mut cached: Vec<SourceRecord>) {
        let current = self.sources_tx.borrow().clone();
        for record in &mut cached {
            if let Some(shown) = current.iter().find(|r| r.name == record.name) {
                record.status = shown.status;
            }
        }
        self.sources_tx.send_replace(Arc::new(cached));
    }

    /// Merge sweep results into the current list without touching liveness
    fn publish_partial(&self, found: &[SourceRecord]) {
        let current = self.sources_tx.borrow().clone();
        let merged = dedup_by_name(
            current
                .iter()
                .filter(|r| !r.is_placeholder())
                .cloned()
                .chain(found.iter().cloned()),
        );
        self.sources_tx.send_replace(Arc::new(merged));
    }

    /// Fold one pass's observations into the liveness table and publish the
    /// resulting list.
    fn reconcile(&self, observed: Vec<SourceRecord>, now: Instant) {
        let observed = dedup_by_name(observed);
        let seen: HashSet<String> = observed.iter().map(|r| r.name.clone()).collect();
        self.liveness.reconcile(&seen, now);

        let previous = self.sources_tx.borrow().clone();
        let timeout = self.config.source_timeout();

        let mut next: Vec<SourceRecord> = Vec::with_capacity(observed.len());
        for mut record in observed {
            record.last_seen = now;
            record.is_online = true;
            match previous.iter().find(|r| r.name == record.name) {
                Some(prior) => {
                    let mut merged = prior.clone();
                    merged.merge_observation(record);
                    next.push(merged);
                }
                None => {
                    if let Some(first_seen) = self.liveness.first_seen(&record.name) {
                        record.first_seen = first_seen;
                    }
                    next.push(record);
                }
            }
        }

        for prior in previous.iter() {
            if prior.is_placeholder() || seen.contains(&prior.name) {
                continue;
            }
            if prior.is_expired(now, timeout) {
                tracing::info!("Source {} timed out", prior.name);
                continue;
            }
            let mut stale = prior.clone();
            stale.is_online = false;
            next.push(stale);
        }

        if next.is_empty() {
            next.push(SourceRecord::placeholder(now));
        }

        self.sources_tx.send_replace(Arc::new(next));
    }
}

/// Fixed source set published in synthetic mode
fn synthetic_sources(now: Instant) -> Vec<SourceRecord> {
    vec![
        SourceRecord::new(
            "Test OBS PGM",
            "OBS-PC",
            "192.168.1.100:5960",
            SourceKind::Standard,
            now,
        )
        .with_description("Synthetic test source"),
        SourceRecord::new(
            "Test OBS PREVIEW",
            "OBS-PC",
            "192.168.1.101:5961",
            SourceKind::CompressedHx2,
            now,
        )
        .with_description("Synthetic test source"),
    ]
}
