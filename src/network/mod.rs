//! Network subsystem for the discovery fallback

pub mod interface;
pub mod probe;

pub use interface::local_address;
pub use probe::{candidate_hosts, probe_host, NetworkProbe};
