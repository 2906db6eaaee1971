//! Boundary to the native discovery/capture library
//!
//! The library itself is an external collaborator. Everything this crate
//! needs from it is expressed by [`NativeCapability`]; when no
//! implementation is supplied, or it fails, the engine and session fall
//! back to the network probe and the simulated stream.
//!
//! All methods are blocking, mirroring a foreign call. Async code goes
//! through [`blocking`], which runs the call on the blocking pool and turns
//! a panic inside the library wrapper into a [`CapabilityError`].

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CapabilityError;

/// A frame as handed over by the native library, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub timestamp_ms: u64,
    /// Bytes per row when rows are padded; `None` means tightly packed
    pub line_stride: Option<usize>,
    pub data: Bytes,
}

/// Native discovery and receive operations
pub trait NativeCapability: Send + Sync {
    /// Bring up the discovery side. `Ok(false)` means the library loaded but refused.
    fn initialize_discovery(&self) -> Result<bool, CapabilityError>;

    /// Return display strings of the form `NAME (MACHINE_INFO)`
    fn find_sources(&self, timeout: Duration) -> Result<Vec<String>, CapabilityError>;

    fn discovery_version(&self) -> Result<String, CapabilityError>;

    fn teardown_discovery(&self);

    fn initialize_receiver(&self) -> Result<bool, CapabilityError>;

    fn connect(&self, source_name: &str, address: &str) -> Result<bool, CapabilityError>;

    fn disconnect(&self);

    /// Next video frame, or `None` when nothing arrived within `timeout`
    fn pull_frame(&self, timeout: Duration) -> Result<Option<RawFrame>, CapabilityError>;

    fn teardown_receiver(&self);
}

/// Thread-safe handle to a capability implementation
pub type SharedCapability = Arc<dyn NativeCapability>;

/// Run a native call on the blocking pool
pub async fn blocking<T, F>(capability: SharedCapability, call: F) -> Result<T, CapabilityError>
where
    T: Send + 'static,
    F: FnOnce(&dyn NativeCapability) -> Result<T, CapabilityError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(capability.as_ref()))
        .await
        .map_err(|e| CapabilityError::CallFailed(e.to_string()))?
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedCapability;
    use super::*;

    struct PanickingCapability;

    impl NativeCapability for PanickingCapability {
        fn initialize_discovery(&self) -> Result<bool, CapabilityError> {
            panic!("library not linked")
        }
        fn find_sources(&self, _: Duration) -> Result<Vec<String>, CapabilityError> {
            panic!("library not linked")
        }
        fn discovery_version(&self) -> Result<String, CapabilityError> {
            panic!("library not linked")
        }
        fn teardown_discovery(&self) {}
        fn initialize_receiver(&self) -> Result<bool, CapabilityError> {
            panic!("library not linked")
        }
        fn connect(&self, _: &str, _: &str) -> Result<bool, CapabilityError> {
            panic!("library not linked")
        }
        fn disconnect(&self) {}
        fn pull_frame(&self, _: Duration) -> Result<Option<RawFrame>, CapabilityError> {
            panic!("library not linked")
        }
        fn teardown_receiver(&self) {}
    }

    #[tokio::test]
    async fn test_blocking_returns_value() {
        let cap = ScriptedCapability::healthy();
        cap.set_sources(&["Cam (HOST)"]);
        let names = blocking(cap, |c| c.find_sources(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(names, vec!["Cam (HOST)".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_contains_panics() {
        let cap: SharedCapability = Arc::new(PanickingCapability);
        let result = blocking(cap, |c| c.find_sources(Duration::from_millis(10))).await;
        assert!(matches!(result, Err(CapabilityError::CallFailed(_))));
    }
}
