//! Lock-free frame queue
//!
//! A bounded multi-producer multi-consumer queue for consumers that want
//! every frame rather than only the newest one. When full, the oldest
//! frame is dropped to make room.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::receiver::frame::VideoFrame;

/// Bounded queue of delivered frames
pub struct FrameBuffer {
    queue: ArrayQueue<VideoFrame>,
    pushed: AtomicUsize,
    dropped: AtomicUsize,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            pushed: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Push a frame, evicting the oldest one if the buffer is full.
    /// Returns true if a frame was evicted.
    pub fn push(&self, frame: VideoFrame) -> bool {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        match self.queue.force_push(frame) {
            Some(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn pop(&self) -> Option<VideoFrame> {
        self.queue.pop()
    }

    /// Take every buffered frame, oldest first
    pub fn drain(&self) -> Vec<VideoFrame> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Frames pushed since creation
    pub fn pushed_count(&self) -> usize {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Frames evicted before anyone popped them
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a frame buffer
pub type SharedFrameBuffer = Arc<FrameBuffer>;

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64) -> VideoFrame {
        VideoFrame::new(1, 1, 30.0, ts, vec![0u8; 4], "cam").unwrap()
    }

    #[test]
    fn test_fifo_order() {
        let buffer = FrameBuffer::new(4);
        assert!(!buffer.push(frame(0)));
        assert!(!buffer.push(frame(1)));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().unwrap().timestamp_ms(), 0);
        assert_eq!(buffer.pop().unwrap().timestamp_ms(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = FrameBuffer::new(2);
        buffer.push(frame(0));
        buffer.push(frame(1));
        assert!(buffer.push(frame(2)));

        let kept: Vec<u64> = buffer.drain().iter().map(|f| f.timestamp_ms()).collect();
        assert_eq!(kept, vec![1, 2]);
        assert_eq!(buffer.dropped_count(), 1);
        assert_eq!(buffer.pushed_count(), 3);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(frame(0));
        assert_eq!(buffer.fill_level(), 1.0);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
