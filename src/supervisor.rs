//! Session supervisor
//!
//! The single coordinator for a process: one discovery engine, one receive
//! session, and the order in which they are torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::capability::{self, SharedCapability};
use crate::config::MonitorConfig;
use crate::discovery::DiscoveryEngine;
use crate::error::{Result, SessionError};
use crate::receiver::ConnectionSession;
use crate::source::{ConnectionStatus, SourceRecord};

/// Owns the discovery engine and the receive session
pub struct SessionSupervisor {
    config: MonitorConfig,
    engine: DiscoveryEngine,
    session: ConnectionSession,
    capability: Option<SharedCapability>,
    /// Serializes connect, disconnect and shutdown
    control: Mutex<()>,
    shut_down: AtomicBool,
}

impl SessionSupervisor {
    pub fn new(config: MonitorConfig, capability: Option<SharedCapability>) -> Self {
        let engine = DiscoveryEngine::new(
            config.discovery.clone(),
            config.probe.clone(),
            capability.clone(),
        );
        let session = ConnectionSession::new(config.receiver.clone(), capability.clone());

        Self {
            config,
            engine,
            session,
            capability,
            control: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn engine(&self) -> &DiscoveryEngine {
        &self.engine
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    pub fn has_native_capability(&self) -> bool {
        self.capability.is_some()
    }

    /// Initialize discovery and the receiver. Both degrade instead of failing.
    pub async fn initialize(&self) -> bool {
        let discovery = self.engine.initialize().await;
        let native_receive = self.session.initialize().await;
        tracing::info!(
            "Supervisor ready: discovery {:?}, native receive {}",
            self.engine.mode(),
            native_receive
        );
        self.shut_down.store(false, Ordering::SeqCst);
        discovery
    }

    /// Initialize if needed and start scanning
    pub async fn start(&self) -> Result<()> {
        if !self.engine.is_initialized() {
            self.initialize().await;
        }
        self.engine.start_scanning().await?;
        Ok(())
    }

    /// Connect the session to `source`, recording the attempt in the
    /// liveness table and mirroring the outcome on the source list.
    pub async fn connect(&self, source: &SourceRecord) -> bool {
        let _control = self.control.lock().await;
        let liveness = self.engine.liveness();

        if let Some(previous) = self.session.active_source() {
            if previous.name != source.name {
                self.engine.set_source_status(&previous.name, ConnectionStatus::Disconnected);
            }
        }

        let started = Instant::now();
        liveness.record_connection_attempt(&source.name, started);
        self.engine.set_source_status(&source.name, ConnectionStatus::Connecting);

        let connected = self.session.connect(source).await;
        if connected {
            self.engine.set_source_status(&source.name, self.session.status());
            liveness.record_successful_connection(&source.name, started.elapsed());
        } else {
            let listed = match self.engine.find_source(&source.name) {
                Some(record) if !record.is_online => ConnectionStatus::SourceUnavailable,
                _ => self.session.last_failure().unwrap_or_else(|| self.session.status()),
            };
            self.engine.set_source_status(&source.name, listed);

            let message = self
                .session
                .last_error()
                .unwrap_or_else(|| SessionError::ConnectFailed(source.name.clone()).to_string());
            liveness.record_error(&source.name, message);
        }
        connected
    }

    /// Connect to a published source by name
    pub async fn connect_by_name(&self, name: &str) -> Result<bool> {
        let source = self
            .engine
            .find_source(name)
            .ok_or_else(|| SessionError::NotConnectable(name.to_string()))?;
        Ok(self.connect(&source).await)
    }

    pub fn start_receiving(&self) -> bool {
        let started = self.session.start_receiving();
        if started {
            if let Some(source) = self.session.active_source() {
                self.engine.set_source_status(&source.name, ConnectionStatus::Streaming);
            }
        }
        started
    }

    pub async fn stop_receiving(&self) {
        self.session.stop_receiving().await;
        if let Some(source) = self.session.active_source() {
            self.engine.set_source_status(&source.name, self.session.status());
        }
    }

    pub async fn disconnect(&self) {
        let _control = self.control.lock().await;
        self.disconnect_session().await;
    }

    async fn disconnect_session(&self) {
        let active = self.session.active_source();
        self.session.disconnect().await;
        if let Some(source) = active {
            self.engine.set_source_status(&source.name, ConnectionStatus::Disconnected);
        }
    }

    /// Stop scanning, disconnect, release native handles, clear state.
    ///
    /// Each step waits for the previous one, so no loop is running when
    /// the native handles go away. Safe to repeat.
    pub async fn shutdown(&self) {
        let _control = self.control.lock().await;
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down");

        self.engine.stop_scanning().await;
        self.disconnect_session().await;

        self.session.shutdown().await;
        self.engine.release_capability().await;

        self.engine.clear();
        self.session.clear_error();
        tracing::info!("Shutdown complete");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Native library version, if one is loaded
    pub async fn native_version(&self) -> Option<String> {
        let cap = self.capability.clone()?;
        capability::blocking(cap, |c| c.discovery_version()).await.ok()
    }
}
