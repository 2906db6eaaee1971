//! Error types for the monitor

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Native discovery/capture capability errors
///
/// None of these are fatal: callers fall back to the network or simulated path.
#[derive(Error, Debug, Clone)]
pub enum CapabilityError {
    #[error("Native capability unavailable: {0}")]
    Unavailable(String),

    #[error("Native initialization failed: {0}")]
    InitFailed(String),

    #[error("Native call failed: {0}")]
    CallFailed(String),
}

/// Discovery pass errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Discovery is not initialized")]
    NotInitialized,

    #[error("No usable local IPv4 address")]
    NoLocalAddress,

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Connection session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Source is not connectable: {0}")]
    NotConnectable(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Frame delivery failed: {0}")]
    FrameDelivery(String),

    #[error(transparent)]
    Capability(#[from] CapabilityError),
}

/// Structural frame validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame has zero geometry: {width}x{height}")]
    ZeroGeometry { width: u32, height: u32 },

    #[error("Line stride {stride} is shorter than a row of {width} pixels")]
    InvalidStride { stride: usize, width: u32 },

    #[error("Malformed frame: {width}x{height} needs {expected} bytes, got {actual}")]
    Malformed {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
