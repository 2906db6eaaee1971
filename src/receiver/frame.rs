//! Video frames handed to the rendering side

use bytes::{Bytes, BytesMut};
use std::hash::{Hash, Hasher};

use crate::capability::RawFrame;
use crate::constants::BYTES_PER_PIXEL;
use crate::error::FrameError;

/// An immutable ARGB frame, 4 bytes per pixel, row-major, tightly packed.
///
/// Construction validates the geometry, so any `VideoFrame` satisfies
/// `data().len() == width * height * 4`.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    frame_rate: f32,
    timestamp_ms: u64,
    data: Bytes,
    source_name: String,
}

impl VideoFrame {
    /// Build a frame from tightly packed ARGB bytes.
    ///
    /// Bytes beyond `width * height * 4` are ignored; fewer is an error.
    pub fn new(
        width: u32,
        height: u32,
        frame_rate: f32,
        timestamp_ms: u64,
        data: impl Into<Bytes>,
        source_name: impl Into<String>,
    ) -> Result<Self, FrameError> {
        let data = data.into();
        let expected = expected_len(width, height)?;
        if data.len() < expected {
            return Err(FrameError::Malformed {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            frame_rate,
            timestamp_ms,
            data: data.slice(..expected),
            source_name: source_name.into(),
        })
    }

    /// Validate a native frame, repacking padded rows when a stride is given
    pub fn from_raw(raw: RawFrame, source_name: &str) -> Result<Self, FrameError> {
        expected_len(raw.width, raw.height)?;
        let row = raw.width as usize * BYTES_PER_PIXEL;

        let data = match raw.line_stride {
            Some(stride) if stride != row => {
                if stride < row {
                    return Err(FrameError::InvalidStride {
                        stride,
                        width: raw.width,
                    });
                }
                repack(&raw.data, raw.width, raw.height, stride, row)?
            }
            _ => raw.data,
        };

        Self::new(
            raw.width,
            raw.height,
            raw.frame_rate,
            raw.timestamp_ms,
            data,
            source_name,
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// ARGB pixel bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// ARGB of the pixel at (`x`, `y`)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = self.data.get(i..i + BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl PartialEq for VideoFrame {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.frame_rate.to_bits() == other.frame_rate.to_bits()
            && self.timestamp_ms == other.timestamp_ms
            && self.source_name == other.source_name
            && self.data == other.data
    }
}

impl Eq for VideoFrame {}

impl Hash for VideoFrame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.width.hash(state);
        self.height.hash(state);
        self.frame_rate.to_bits().hash(state);
        self.timestamp_ms.hash(state);
        self.source_name.hash(state);
        self.data.hash(state);
    }
}

fn expected_len(width: u32, height: u32) -> Result<usize, FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::ZeroGeometry { width, height });
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(BYTES_PER_PIXEL))
        .ok_or(FrameError::Malformed {
            width,
            height,
            expected: usize::MAX,
            actual: 0,
        })
}

/// Copy `height` rows of `row` bytes out of a buffer with `stride` bytes per row
fn repack(
    data: &Bytes,
    width: u32,
    height: u32,
    stride: usize,
    row: usize,
) -> Result<Bytes, FrameError> {
    let rows = height as usize;
    let needed = stride
        .checked_mul(rows - 1)
        .and_then(|padded| padded.checked_add(row))
        .ok_or(FrameError::Malformed {
            width,
            height,
            expected: usize::MAX,
            actual: data.len(),
        })?;
    if data.len() < needed {
        return Err(FrameError::Malformed {
            width,
            height,
            expected: needed,
            actual: data.len(),
        });
    }

    let mut packed = BytesMut::with_capacity(row * rows);
    for y in 0..rows {
        let start = y * stride;
        packed.extend_from_slice(&data[start..start + row]);
    }
    Ok(packed.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn raw(width: u32, height: u32, stride: Option<usize>, data: Vec<u8>) -> RawFrame {
        RawFrame {
            width,
            height,
            frame_rate: 30.0,
            timestamp_ms: 7,
            line_stride: stride,
            data: Bytes::from(data),
        }
    }

    #[test]
    fn test_new_validates_length() {
        let frame = VideoFrame::new(2, 2, 30.0, 0, vec![0u8; 16], "cam").unwrap();
        assert_eq!(frame.data().len(), 16);

        let err = VideoFrame::new(2, 2, 30.0, 0, vec![0u8; 15], "cam").unwrap_err();
        assert_eq!(
            err,
            FrameError::Malformed {
                width: 2,
                height: 2,
                expected: 16,
                actual: 15
            }
        );

        let err = VideoFrame::new(0, 2, 30.0, 0, Vec::new(), "cam").unwrap_err();
        assert!(matches!(err, FrameError::ZeroGeometry { .. }));
    }

    #[test]
    fn test_trailing_bytes_are_trimmed() {
        let frame = VideoFrame::new(1, 1, 30.0, 0, vec![1, 2, 3, 4, 5, 6], "cam").unwrap();
        assert_eq!(&frame.data()[..], &[1u8, 2, 3, 4][..]);
    }

    #[test]
    fn test_from_raw_repacks_stride() {
        // 2x2 frame with 4 bytes of padding per row
        let mut data = Vec::new();
        data.extend_from_slice(&[1; 8]);
        data.extend_from_slice(&[0xEE; 4]);
        data.extend_from_slice(&[2; 8]);

        let frame = VideoFrame::from_raw(raw(2, 2, Some(12), data), "cam").unwrap();
        assert_eq!(frame.data().len(), 16);
        assert_eq!(frame.pixel(1, 0), Some([1, 1, 1, 1]));
        assert_eq!(frame.pixel(0, 1), Some([2, 2, 2, 2]));
        assert_eq!(frame.pixel(2, 0), None);
        assert_eq!(frame.timestamp_ms(), 7);
    }

    #[test]
    fn test_from_raw_rejects_bad_stride() {
        let err = VideoFrame::from_raw(raw(2, 2, Some(4), vec![0; 16]), "cam").unwrap_err();
        assert_eq!(err, FrameError::InvalidStride { stride: 4, width: 2 });

        let err = VideoFrame::from_raw(raw(2, 2, Some(12), vec![0; 12]), "cam").unwrap_err();
        assert!(matches!(err, FrameError::Malformed { .. }));
    }

    #[test]
    fn test_from_raw_rejects_overflowing_stride() {
        let err = VideoFrame::from_raw(raw(1, 3, Some(usize::MAX / 2 + 1), vec![0; 64]), "cam")
            .unwrap_err();
        assert!(matches!(err, FrameError::Malformed { actual: 64, .. }));

        let err = VideoFrame::from_raw(raw(1, 2, Some(usize::MAX), vec![0; 8]), "cam").unwrap_err();
        assert!(matches!(err, FrameError::Malformed { .. }));
    }

    #[test]
    fn test_structural_equality_and_hash() {
        let a = VideoFrame::new(1, 1, 30.0, 5, vec![1, 2, 3, 4], "cam").unwrap();
        let b = VideoFrame::new(1, 1, 30.0, 5, Bytes::from(vec![1, 2, 3, 4]), "cam").unwrap();
        let c = VideoFrame::new(1, 1, 30.0, 5, vec![1, 2, 3, 5], "cam").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<VideoFrame> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
