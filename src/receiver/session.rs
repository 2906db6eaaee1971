//! Connection session
//!
//! Drives the connection to a single source and the frame loop that feeds
//! the rendering side. Status, frames and error messages are published on
//! separate `watch` channels; observers must not assume they move in
//! lockstep.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──► Connected ◄──loop exit──┐
//!      ▲                          │              │                   │
//!      │                          ▼              ▼ start_receiving() │
//!      │                   ConnectionFailed   Streaming ─────────────┘
//!      └────────────── disconnect() (via Disconnecting)
//! ```

use futures_util::stream::{self, Stream};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capability::{self, SharedCapability};
use crate::config::ReceiverConfig;
use crate::error::{CapabilityError, SessionError};
use crate::receiver::buffer::{FrameBuffer, SharedFrameBuffer};
use crate::receiver::frame::VideoFrame;
use crate::receiver::pattern::render_test_pattern;
use crate::source::{ConnectionStatus, SourceRecord};

/// Where frames come from once connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReceivePath {
    Native,
    Simulated,
}

#[derive(Debug, Clone)]
struct ActiveSource {
    record: SourceRecord,
    path: ReceivePath,
}

struct FrameTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Session counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: Uuid,
    pub status: ConnectionStatus,
    pub source: Option<String>,
    pub path: Option<ReceivePath>,
    pub frames_delivered: u64,
    /// Frames that failed validation
    pub frames_rejected: u64,
    /// Frames evicted from the frame buffer unread
    pub frames_overwritten: usize,
    pub loop_errors: u64,
}

struct SessionInner {
    id: Uuid,
    config: ReceiverConfig,
    capability: Option<SharedCapability>,
    receiver_ready: AtomicBool,
    status_tx: watch::Sender<ConnectionStatus>,
    frame_tx: watch::Sender<Option<VideoFrame>>,
    error_tx: watch::Sender<Option<String>>,
    active: RwLock<Option<ActiveSource>>,
    /// Status describing why the last connect returned false
    last_failure: RwLock<Option<ConnectionStatus>>,
    buffer: SharedFrameBuffer,
    task: Mutex<Option<FrameTask>>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    frames_delivered: AtomicU64,
    frames_rejected: AtomicU64,
    loop_errors: AtomicU64,
}

/// A receive session bound to at most one source at a time
#[derive(Clone)]
pub struct ConnectionSession {
    inner: Arc<SessionInner>,
}

impl ConnectionSession {
    pub fn new(config: ReceiverConfig, capability: Option<SharedCapability>) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (frame_tx, _) = watch::channel(None);
        let (error_tx, _) = watch::channel(None);
        let buffer = Arc::new(FrameBuffer::new(config.frame_buffer_capacity));

        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                config,
                capability,
                receiver_ready: AtomicBool::new(false),
                status_tx,
                frame_tx,
                error_tx,
                active: RwLock::new(None),
                last_failure: RwLock::new(None),
                buffer,
                task: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                frames_delivered: AtomicU64::new(0),
                frames_rejected: AtomicU64::new(0),
                loop_errors: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Bring up the native receiver. Returns whether native receive is
    /// available; without it every connection uses the simulated path.
    pub async fn initialize(&self) -> bool {
        if self.inner.receiver_ready.load(Ordering::SeqCst) {
            return true;
        }

        let ready = match self.init_receiver().await {
            Ok(()) => true,
            Err(e @ CapabilityError::Unavailable(_)) => {
                tracing::info!("{}, connections will be simulated", e);
                false
            }
            Err(e) => {
                tracing::warn!("{}, connections will be simulated", e);
                false
            }
        };
        self.inner.receiver_ready.store(ready, Ordering::SeqCst);
        ready
    }

    async fn init_receiver(&self) -> Result<(), CapabilityError> {
        let cap = self
            .inner
            .capability
            .clone()
            .ok_or_else(|| CapabilityError::Unavailable("no native receiver linked".into()))?;

        if capability::blocking(cap, |c| c.initialize_receiver()).await? {
            Ok(())
        } else {
            Err(CapabilityError::InitFailed("native receiver refused to start".into()))
        }
    }

    /// Connect to `source`, replacing any current connection.
    ///
    /// Ends in `Connected` (native or simulated), `ConnectionFailed` when
    /// the native attempt fails and simulation is disabled, or
    /// `Disconnected` when the source is not connectable.
    pub async fn connect(&self, source: &SourceRecord) -> bool {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.status() != ConnectionStatus::Disconnected || self.inner.active.read().is_some() {
            tracing::info!("Session busy, disconnecting before connecting to {}", source.name);
            self.disconnect_locked().await;
        }
        *self.inner.last_failure.write() = None;

        if source.name.trim().is_empty() || source.is_placeholder() {
            let err = SessionError::NotConnectable(source.name.clone());
            tracing::warn!("{}", err);
            self.publish_error(err.to_string());
            self.inner.status_tx.send_replace(ConnectionStatus::Disconnected);
            return false;
        }

        self.inner.status_tx.send_replace(ConnectionStatus::Connecting);
        tracing::info!("Connecting to {} at {}", source.name, source.address);

        let path = match self.connect_native(source).await {
            Ok(()) => ReceivePath::Native,
            Err(e) => {
                self.publish_error(e.to_string());
                if !self.inner.config.simulate_on_failure {
                    tracing::error!("Connection to {} failed: {}", source.name, e);
                    *self.inner.last_failure.write() = Some(failure_status(&e));
                    self.inner.status_tx.send_replace(ConnectionStatus::ConnectionFailed);
                    return false;
                }
                tracing::warn!("{}; using simulated stream for {}", e, source.name);
                ReceivePath::Simulated
            }
        };

        *self.inner.active.write() = Some(ActiveSource {
            record: source.clone().with_status(ConnectionStatus::Connected),
            path,
        });
        self.inner.status_tx.send_replace(ConnectionStatus::Connected);
        tracing::info!("Connected to {} ({:?})", source.name, path);
        true
    }

    /// One native connect attempt, no retry
    async fn connect_native(&self, source: &SourceRecord) -> Result<(), SessionError> {
        let Some(cap) = self.inner.capability.clone() else {
            return Err(CapabilityError::Unavailable("no native receiver linked".into()).into());
        };
        if !self.inner.receiver_ready.load(Ordering::SeqCst) {
            let err = CapabilityError::Unavailable("native receiver not initialized".into());
            return Err(err.into());
        }

        let name = source.name.clone();
        let address = source.address.clone();
        if capability::blocking(cap, move |c| c.connect(&name, &address)).await? {
            Ok(())
        } else {
            Err(SessionError::ConnectFailed(format!("{} refused the connection", source.name)))
        }
    }

    /// Start the frame loop. Only valid while `Connected`; otherwise a
    /// warning is logged and nothing changes.
    pub fn start_receiving(&self) -> bool {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            tracing::warn!("start_receiving() ignored in state {:?}", status);
            return false;
        }
        let Some(active) = self.inner.active.read().clone() else {
            tracing::warn!("start_receiving() ignored without an active source");
            return false;
        };

        let mut task = self.inner.task.lock();
        if task.is_some() {
            return false;
        }

        self.inner.status_tx.send_replace(ConnectionStatus::Streaming);
        tracing::info!("Receiving from {} ({:?})", active.record.name, active.path);

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            match active.path {
                ReceivePath::Native => inner.native_loop(&active.record.name, &loop_cancel).await,
                ReceivePath::Simulated => {
                    inner.simulated_loop(&active.record.name, &loop_cancel).await
                }
            }
            inner.status_tx.send_if_modified(|status| {
                if *status == ConnectionStatus::Streaming {
                    *status = ConnectionStatus::Connected;
                    true
                } else {
                    false
                }
            });
        });

        *task = Some(FrameTask { cancel, handle });
        true
    }

    /// Cancel the frame loop and wait for it. No-op if not streaming.
    pub async fn stop_receiving(&self) {
        let task = self.inner.task.lock().take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            tracing::error!("Frame loop terminated abnormally: {}", e);
        }
        self.inner.status_tx.send_if_modified(|status| {
            if *status == ConnectionStatus::Streaming {
                *status = ConnectionStatus::Connected;
                true
            } else {
                false
            }
        });
        tracing::info!("Stopped receiving");
    }

    /// Stop receiving, release the native connection and forget the
    /// source. Safe to repeat.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.disconnect_locked().await;
    }

    async fn disconnect_locked(&self) {
        let idle = self.status() == ConnectionStatus::Disconnected
            && self.inner.active.read().is_none()
            && self.inner.task.lock().is_none();
        if idle {
            return;
        }

        self.inner.status_tx.send_replace(ConnectionStatus::Disconnecting);
        self.stop_receiving().await;

        let active = self.inner.active.write().take();
        if let Some(active) = &active {
            if active.path == ReceivePath::Native {
                self.release_native_connection().await;
            }
            tracing::info!("Disconnected from {}", active.record.name);
        }

        self.inner.frame_tx.send_replace(None);
        self.inner.buffer.clear();
        *self.inner.last_failure.write() = None;
        self.inner.status_tx.send_replace(ConnectionStatus::Disconnected);
    }

    async fn release_native_connection(&self) {
        if let Some(cap) = self.inner.capability.clone() {
            let result = capability::blocking(cap, |c| {
                c.disconnect();
                Ok(())
            })
            .await;
            if let Err(e) = result {
                tracing::warn!("Native disconnect failed: {}", e);
            }
        }
    }

    /// Disconnect and tear down the native receiver
    pub async fn shutdown(&self) {
        self.disconnect().await;

        if self.inner.receiver_ready.swap(false, Ordering::SeqCst) {
            if let Some(cap) = self.inner.capability.clone() {
                let result = capability::blocking(cap, |c| {
                    c.teardown_receiver();
                    Ok(())
                })
                .await;
                match result {
                    Ok(()) => tracing::info!("Released native receiver"),
                    Err(e) => tracing::warn!("Native receiver teardown failed: {}", e),
                }
            }
        }
        self.inner.error_tx.send_replace(None);
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    pub fn is_streaming(&self) -> bool {
        self.status() == ConnectionStatus::Streaming
    }

    pub fn active_source(&self) -> Option<SourceRecord> {
        self.inner.active.read().as_ref().map(|active| active.record.clone())
    }

    pub fn receive_path(&self) -> Option<ReceivePath> {
        self.inner.active.read().as_ref().map(|active| active.path)
    }

    pub fn last_frame(&self) -> Option<VideoFrame> {
        self.inner.frame_tx.borrow().clone()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<Option<VideoFrame>> {
        self.inner.frame_tx.subscribe()
    }

    /// Stream of delivered frames with latest-value semantics: a slow
    /// consumer skips to the newest frame.
    pub fn frames(&self) -> impl Stream<Item = VideoFrame> {
        stream::unfold(self.inner.frame_tx.subscribe(), |mut rx| async move {
            loop {
                rx.changed().await.ok()?;
                let frame = rx.borrow_and_update().clone();
                if let Some(frame) = frame {
                    return Some((frame, rx));
                }
            }
        })
    }

    /// Why the last connect returned false: `ConnectionFailed` when the
    /// source was refused or no native receiver exists, `NetworkError` when
    /// the native call itself failed. `None` after a successful connect.
    pub fn last_failure(&self) -> Option<ConnectionStatus> {
        *self.inner.last_failure.read()
    }

    /// Most recent non-fatal error message
    pub fn last_error(&self) -> Option<String> {
        self.inner.error_tx.borrow().clone()
    }

    pub fn errors(&self) -> watch::Receiver<Option<String>> {
        self.inner.error_tx.subscribe()
    }

    pub fn clear_error(&self) {
        self.inner.error_tx.send_replace(None);
    }

    /// Queue holding every delivered frame until popped
    pub fn frame_buffer(&self) -> SharedFrameBuffer {
        self.inner.buffer.clone()
    }

    pub fn stats(&self) -> SessionStats {
        let active = self.inner.active.read().clone();
        SessionStats {
            session_id: self.inner.id,
            status: self.status(),
            source: active.as_ref().map(|a| a.record.name.clone()),
            path: active.as_ref().map(|a| a.path),
            frames_delivered: self.inner.frames_delivered.load(Ordering::Relaxed),
            frames_rejected: self.inner.frames_rejected.load(Ordering::Relaxed),
            frames_overwritten: self.inner.buffer.dropped_count(),
            loop_errors: self.inner.loop_errors.load(Ordering::Relaxed),
        }
    }

    fn publish_error(&self, message: String) {
        self.inner.error_tx.send_replace(Some(message));
    }
}

impl SessionInner {
    fn still_streaming(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Streaming
    }

    async fn native_loop(&self, source_name: &str, cancel: &CancellationToken) {
        let Some(cap) = self.capability.clone() else {
            return;
        };
        let timeout = self.config.pull_timeout();
        let mut delivered = 0u64;

        while !cancel.is_cancelled() && self.still_streaming() {
            // Pulls are always awaited to completion so the receiver is
            // never torn down mid-call
            let pulled = capability::blocking(cap.clone(), move |c| c.pull_frame(timeout)).await;
            if cancel.is_cancelled() {
                break;
            }

            match pulled {
                Ok(Some(raw)) => match VideoFrame::from_raw(raw, source_name) {
                    Ok(frame) => {
                        self.deliver(frame);
                        delivered += 1;
                        if delivered % 30 == 0 {
                            tracing::debug!("Received {} frames from {}", delivered, source_name);
                        }
                    }
                    Err(e) => {
                        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Dropping frame from {}: {}", source_name, e);
                    }
                },
                Ok(None) => {
                    if !pause(self.config.empty_pull_backoff(), cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    let err = SessionError::FrameDelivery(e.to_string());
                    if !self.loop_error(err, cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Native frame loop for {} stopped after {} frames", source_name, delivered);
    }

    async fn simulated_loop(&self, source_name: &str, cancel: &CancellationToken) {
        let (width, height) = (self.config.simulated_width, self.config.simulated_height);
        let frame_rate = self.config.simulated_frame_rate;
        let mut ticker = interval(self.config.simulated_frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut index = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.still_streaming() {
                break;
            }

            let elapsed = started.elapsed();
            let frame_index = index;
            let rendered = tokio::task::spawn_blocking(move || {
                render_test_pattern(width, height, frame_index, elapsed.as_secs_f32())
            })
            .await;
            index += 1;

            let frame = rendered
                .map_err(|e| SessionError::FrameDelivery(e.to_string()))
                .and_then(|pixels| {
                    VideoFrame::new(
                        width,
                        height,
                        frame_rate,
                        elapsed.as_millis() as u64,
                        pixels,
                        source_name,
                    )
                    .map_err(|e| SessionError::FrameDelivery(e.to_string()))
                });

            match frame {
                Ok(frame) => {
                    self.deliver(frame);
                    if index % 30 == 0 {
                        tracing::debug!("Simulated {} frames for {}", index, source_name);
                    }
                }
                Err(e) => {
                    if !self.loop_error(e, cancel).await {
                        break;
                    }
                }
            }
        }

        tracing::info!("Simulated frame loop for {} stopped after {} frames", source_name, index);
    }

    fn deliver(&self, frame: VideoFrame) {
        if let Some(active) = self.active.write().as_mut() {
            let record = &mut active.record;
            let (width, height) = (Some(frame.width()), Some(frame.height()));
            if record.video_width != width || record.video_height != height {
                record.video_width = width;
                record.video_height = height;
                record.frame_rate = Some(frame.frame_rate());
            }
        }
        self.buffer.push(frame.clone());
        self.frame_tx.send_replace(Some(frame));
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Log and publish a loop failure, then back off. False when cancelled.
    async fn loop_error(&self, err: SessionError, cancel: &CancellationToken) -> bool {
        tracing::error!("Frame loop error: {}", err);
        self.loop_errors.fetch_add(1, Ordering::Relaxed);
        self.error_tx.send_replace(Some(err.to_string()));
        pause(self.config.error_backoff(), cancel).await
    }
}

fn failure_status(err: &SessionError) -> ConnectionStatus {
    match err {
        SessionError::Capability(CapabilityError::CallFailed(_)) => ConnectionStatus::NetworkError,
        _ => ConnectionStatus::ConnectionFailed,
    }
}

/// Sleep unless cancelled first. Returns false when cancelled.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::ScriptedCapability;
    use crate::capability::RawFrame;
    use crate::source::SourceKind;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn source(name: &str) -> SourceRecord {
        SourceRecord::new(name, "HOST", "10.0.0.9:5960", SourceKind::Standard, Instant::now())
    }

    fn raw(width: u32, height: u32, len: usize) -> RawFrame {
        RawFrame {
            width,
            height,
            frame_rate: 25.0,
            timestamp_ms: 1,
            line_stride: None,
            data: Bytes::from(vec![0x7f; len]),
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_simulated_stream_without_capability() {
        let session = ConnectionSession::new(ReceiverConfig::default(), None);
        assert!(!session.initialize().await);

        assert!(session.connect(&source("PGM")).await);
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.receive_path(), Some(ReceivePath::Simulated));

        assert!(session.start_receiving());
        assert!(session.is_streaming());

        wait_for(|| session.stats().frames_delivered >= 3).await;

        let frame = session.last_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (720, 480));
        assert_eq!(frame.data().len(), 720 * 480 * 4);
        assert_eq!(frame.source_name(), "PGM");
        assert_eq!(session.active_source().unwrap().short_description(), "720x480");

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_start_receiving_requires_connected() {
        let session = ConnectionSession::new(ReceiverConfig::default(), None);
        assert!(!session.start_receiving());
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.active_source().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let session = ConnectionSession::new(ReceiverConfig::default(), None);
        session.disconnect().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);

        session.connect(&source("PGM")).await;
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.active_source().is_none());
        assert!(session.last_frame().is_none());
    }

    #[tokio::test]
    async fn test_placeholder_is_not_connectable() {
        let session = ConnectionSession::new(ReceiverConfig::default(), None);
        assert!(!session.connect(&SourceRecord::placeholder(Instant::now())).await);
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_native_connect_and_frame_validation() {
        let cap = ScriptedCapability::healthy();
        cap.queue_frame(raw(2, 2, 16));
        cap.queue_frame(raw(2, 2, 10));
        cap.queue_frame(raw(4, 1, 16));

        let session = ConnectionSession::new(ReceiverConfig::default(), Some(cap.clone()));
        assert!(session.initialize().await);
        assert!(session.connect(&source("CAM")).await);
        assert_eq!(session.receive_path(), Some(ReceivePath::Native));
        assert_eq!(cap.connect_calls.load(Ordering::SeqCst), 1);

        let buffer = session.frame_buffer();
        assert!(session.start_receiving());
        wait_for(|| session.stats().frames_delivered == 2).await;

        assert_eq!(session.stats().frames_rejected, 1);
        let widths: Vec<u32> = buffer.drain().iter().map(|f| f.width()).collect();
        assert_eq!(widths, vec![2, 4]);

        session.stop_receiving().await;
        assert_eq!(session.status(), ConnectionStatus::Connected);

        session.shutdown().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
        assert_eq!(cap.disconnect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cap.receiver_teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_end_streaming() {
        let cap = ScriptedCapability::healthy();
        cap.queue_frame(RawFrame {
            line_stride: Some(usize::MAX / 2 + 1),
            ..raw(1, 3, 64)
        });
        cap.queue_frame(raw(1, 1, 4));

        let session = ConnectionSession::new(ReceiverConfig::default(), Some(cap));
        session.initialize().await;
        session.connect(&source("CAM")).await;
        assert!(session.start_receiving());

        wait_for(|| session.stats().frames_delivered == 1).await;
        assert_eq!(session.stats().frames_rejected, 1);
        assert_eq!(session.status(), ConnectionStatus::Streaming);
        assert_eq!(session.last_frame().unwrap().width(), 1);

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_native_call_reports_network_error() {
        let cap = ScriptedCapability::healthy();
        cap.connect_error.store(true, Ordering::SeqCst);
        let config = ReceiverConfig {
            simulate_on_failure: false,
            ..ReceiverConfig::default()
        };

        let session = ConnectionSession::new(config, Some(cap));
        assert!(session.initialize().await);
        assert!(!session.connect(&source("CAM")).await);
        assert_eq!(session.status(), ConnectionStatus::ConnectionFailed);
        assert_eq!(session.last_failure(), Some(ConnectionStatus::NetworkError));

        session.disconnect().await;
        assert_eq!(session.last_failure(), None);
    }

    #[tokio::test]
    async fn test_missing_receiver_is_reported_unavailable() {
        let config = ReceiverConfig {
            simulate_on_failure: false,
            ..ReceiverConfig::default()
        };
        let session = ConnectionSession::new(config, None);
        assert!(!session.initialize().await);

        assert!(!session.connect(&source("CAM")).await);
        assert_eq!(session.last_failure(), Some(ConnectionStatus::ConnectionFailed));
        assert!(session.last_error().unwrap().contains("unavailable"));

        let refusing =
            ConnectionSession::new(ReceiverConfig::default(), Some(ScriptedCapability::refusing()));
        assert!(matches!(
            refusing.init_receiver().await,
            Err(CapabilityError::InitFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connect_falls_back_to_simulation() {
        let cap = ScriptedCapability::healthy();
        cap.connect_ok.store(false, Ordering::SeqCst);

        let session = ConnectionSession::new(ReceiverConfig::default(), Some(cap));
        session.initialize().await;
        assert!(session.connect(&source("CAM")).await);
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.receive_path(), Some(ReceivePath::Simulated));
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_refused_connect_without_simulation_fails() {
        let cap = ScriptedCapability::healthy();
        cap.connect_ok.store(false, Ordering::SeqCst);
        let config = ReceiverConfig {
            simulate_on_failure: false,
            ..ReceiverConfig::default()
        };

        let session = ConnectionSession::new(config, Some(cap));
        session.initialize().await;
        assert!(!session.connect(&source("CAM")).await);
        assert_eq!(session.status(), ConnectionStatus::ConnectionFailed);
        assert!(session.active_source().is_none());

        // A later connect starts over from the failed state
        session.disconnect().await;
        assert_eq!(session.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_while_busy_switches_source() {
        let cap = ScriptedCapability::healthy();
        let session = ConnectionSession::new(ReceiverConfig::default(), Some(cap.clone()));
        session.initialize().await;

        session.connect(&source("A")).await;
        session.start_receiving();
        assert!(session.connect(&source("B")).await);

        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(session.active_source().unwrap().name, "B");
        assert_eq!(cap.disconnect_calls.load(Ordering::SeqCst), 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_frames_stream() {
        let config = ReceiverConfig {
            simulated_width: 16,
            simulated_height: 8,
            ..ReceiverConfig::default()
        };
        let session = ConnectionSession::new(config, None);
        session.connect(&source("PGM")).await;

        let mut frames = Box::pin(session.frames());
        session.start_receiving();

        let first = frames.next().await.unwrap();
        assert_eq!(first.data().len(), 16 * 8 * 4);
        let second = frames.next().await.unwrap();
        assert_ne!(first, second);

        session.stop_receiving().await;
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }
}
