//! # LAN Video Monitor
//!
//! Discovers video sources advertised on the local network, tracks their
//! liveness, and drives a single receive session to one of them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                         SessionSupervisor (supervisor)                      │
//! │                                                                             │
//! │  ┌───────────────────────────────────┐   ┌───────────────────────────────┐  │
//! │  │   DiscoveryEngine (discovery)     │   │  ConnectionSession (receiver) │  │
//! │  │                                   │   │                               │  │
//! │  │   mode chosen at initialize():    │   │  Disconnected                 │  │
//! │  │   ┌──────────┐  ┌──────────────┐  │   │      │ connect()              │  │
//! │  │   │  Native  │  │   Network    │  │   │      ▼                        │  │
//! │  │   │ find_src │  │   Fallback   │  │   │  Connecting                   │  │
//! │  │   └────┬─────┘  │ NetworkProbe │  │   │      │ native or simulated    │  │
//! │  │        │        └──────┬───────┘  │   │      ▼                        │  │
//! │  │        │   ┌───────────┘          │   │  Connected ◄──────┐           │  │
//! │  │        ▼   ▼       ┌───────────┐  │   │      │ start_     │ loop exit │  │
//! │  │  liveness reconcile│ Synthetic │  │   │      ▼ receiving  │           │  │
//! │  │   (LivenessTable)  └───────────┘  │   │  Streaming ───────┘           │  │
//! │  │        │                          │   │      │ frames                 │  │
//! │  │        ▼                          │   │      ▼                        │  │
//! │  │   watch<Arc<Vec<SourceRecord>>>   │   │  watch<VideoFrame> + buffer   │  │
//! │  └────────┬──────────────────────────┘   └──────────────┬────────────────┘  │
//! └───────────┼─────────────────────────────────────────────┼───────────────────┘
//!             ▼                                             ▼
//!        source list observers                      rendering collaborator
//! ```
//!
//! Both background loops (scan, frame) are tokio tasks owned by their
//! component and stopped through a `CancellationToken` followed by a join,
//! so native handles are never released while a loop is mid-call.

pub mod capability;
pub mod config;
pub mod discovery;
pub mod error;
pub mod network;
pub mod receiver;
pub mod source;
pub mod supervisor;

pub use capability::{NativeCapability, RawFrame, SharedCapability};
pub use config::MonitorConfig;
pub use discovery::DiscoveryEngine;
pub use error::{Error, Result};
pub use receiver::{ConnectionSession, VideoFrame};
pub use source::{ConnectionStatus, SourceKind, SourceRecord};
pub use supervisor::SessionSupervisor;

/// Application-wide constants
pub mod constants {
    /// Interval between discovery passes
    pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 3000;

    /// Timeout handed to the native "find sources" call
    pub const DEFAULT_NATIVE_FIND_TIMEOUT_MS: u64 = 3000;

    /// Minimum time between two full network sweeps
    pub const DEFAULT_FALLBACK_COOLDOWN_MS: u64 = 30_000;

    /// A source not seen for this long is dropped from the published list
    pub const DEFAULT_SOURCE_TIMEOUT_MS: u64 = 12_000;

    /// Default port used by sources on the wire
    pub const DEFAULT_SOURCE_PORT: u16 = 5960;

    /// Ports checked on every candidate host
    pub const DEFAULT_PROBE_PORTS: [u16; 6] = [5960, 5961, 5962, 5963, 80, 8080];

    /// TCP connect timeout for a single port
    pub const DEFAULT_PORT_TIMEOUT_MS: u64 = 300;

    /// Overall time budget for probing one host
    pub const DEFAULT_HOST_BUDGET_MS: u64 = 1000;

    /// Last octets that commonly host sources on small networks
    pub const CURATED_HOST_OCTETS: [u8; 9] = [1, 21, 58, 61, 100, 101, 102, 110, 111];

    /// Neighbours of the local address probed on each side
    pub const DEFAULT_NEIGHBOUR_SPAN: u8 = 5;

    /// Native frame pull timeout (~30fps)
    pub const DEFAULT_PULL_TIMEOUT_MS: u64 = 33;

    /// Pause after an empty native pull
    pub const DEFAULT_EMPTY_PULL_BACKOFF_MS: u64 = 16;

    /// Pause after a failed frame loop iteration
    pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 100;

    /// Simulated stream geometry
    pub const SIMULATED_WIDTH: u32 = 720;
    pub const SIMULATED_HEIGHT: u32 = 480;
    pub const SIMULATED_FRAME_RATE: f32 = 30.0;

    /// ARGB
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Frames held for consumers that drain the queue
    pub const FRAME_BUFFER_CAPACITY: usize = 8;
}
