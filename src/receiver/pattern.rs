//! Animated ARGB test pattern for the simulated stream
//!
//! A colour wheel rotating around the frame centre (one turn every 120
//! frames) under a radial pulse driven by elapsed time. The output depends
//! only on the arguments.

use std::f32::consts::PI;

use crate::constants::BYTES_PER_PIXEL;

const ROTATION_FRAMES: u64 = 120;

/// Render one `width` x `height` ARGB frame
pub fn render_test_pattern(
    width: u32,
    height: u32,
    frame_index: u64,
    elapsed_secs: f32,
) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0u8; w * h * BYTES_PER_PIXEL];

    let phase = (frame_index % ROTATION_FRAMES) as f32 / ROTATION_FRAMES as f32 * 2.0 * PI;
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let third = 2.0 * PI / 3.0;

    for (i, px) in data.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
        let dx = (i % w) as f32 - cx;
        let dy = (i / w) as f32 - cy;
        let distance = (dx * dx + dy * dy).sqrt();
        let angle = dy.atan2(dx) + phase;

        let r = (angle.sin() * 127.0 + 127.0).clamp(0.0, 255.0);
        let g = ((angle + third).sin() * 127.0 + 127.0).clamp(0.0, 255.0);
        let b = ((angle + 2.0 * third).sin() * 127.0 + 127.0).clamp(0.0, 255.0);
        let pulse = (elapsed_secs * 2.0 + distance / 50.0).sin() * 0.3 + 0.7;

        px[0] = channel(255.0 * pulse);
        px[1] = channel(r * pulse);
        px[2] = channel(g * pulse);
        px[3] = channel(b * pulse);
    }

    data
}

fn channel(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}
