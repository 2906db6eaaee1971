//! Receive side: frames, the simulated test pattern and the connection session

pub mod buffer;
pub mod frame;
pub mod pattern;
pub mod session;

pub use buffer::{FrameBuffer, SharedFrameBuffer};
pub use frame::VideoFrame;
pub use pattern::render_test_pattern;
pub use session::{ConnectionSession, ReceivePath, SessionStats};
