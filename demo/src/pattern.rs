//! Synthetic test media.

use std::f32::consts::TAU;

use ndarray::Array3;

use rawcast_engine::{MediaArray, Resolution};

/// Tone frequency in Hz.
const TONE_HZ: f32 = 440.0;

/// Eight vertical BGR bars that scroll one column per frame.
pub fn color_bars(resolution: Resolution, frame_index: u64) -> MediaArray {
    const BARS: [[u8; 3]; 8] = [
        [255, 255, 255],
        [0, 255, 255],
        [255, 255, 0],
        [0, 255, 0],
        [255, 0, 255],
        [0, 0, 255],
        [255, 0, 0],
        [0, 0, 0],
    ];

    let width = resolution.width as usize;
    let height = resolution.height as usize;
    let bar_width = (width / BARS.len()).max(1);
    let offset = frame_index as usize % width;

    Array3::from_shape_fn((height, width, 3), |(_, x, c)| {
        let bar = ((x + offset) % width) / bar_width;
        BARS[bar.min(BARS.len() - 1)][c]
    })
    .into()
}

/// A sine tone continuing from sample `start`.
pub fn tone(sample_rate: u32, start: u64, count: usize) -> MediaArray {
    let samples: Vec<f32> = (0..count as u64)
        .map(|i| {
            let t = (start + i) as f32 / sample_rate as f32;
            0.2 * (TAU * TONE_HZ * t).sin()
        })
        .collect();
    samples.into()
}
