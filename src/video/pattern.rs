//! Synthetic frame source
//!
//! Produces vertical colour bars that scroll one bar-width every 25 frames,
//! for running the publisher without a capture device.

use crate::video::frame::{Frame, PixelFormat};

/// SMPTE-style bars as limited-range (16..=235) BT.601 YUV triples
const BARS_YUV: [[u8; 3]; 7] = [
    [235, 128, 128], // white
    [210, 16, 146],  // yellow
    [170, 166, 16],  // cyan
    [145, 54, 34],   // green
    [106, 202, 222], // magenta
    [81, 90, 240],   // red
    [41, 240, 110],  // blue
];

const BARS_RGB: [[u8; 3]; 7] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
];

/// Stretch a limited-range YUV triple to the full 0..=255 span
fn to_full_range([y, u, v]: [u8; 3]) -> [u8; 3] {
    let luma = (y as f32 - 16.0) * 255.0 / 219.0;
    let chroma = |c: u8| (c as f32 - 128.0) * 255.0 / 224.0 + 128.0;
    [luma, chroma(u), chroma(v)].map(|c| c.round().clamp(0.0, 255.0) as u8)
}

/// Generator of colour-bar frames
pub struct TestPattern {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_index: u64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            frame_index: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_index
    }

    /// Render the next frame; its pts is the frame index
    pub fn next_frame(&mut self) -> Frame {
        let shift = (self.frame_index / 25) as usize;
        let mut frame = Frame::alloc(self.width, self.height, self.format);
        let bar_of = |x: usize, width: usize| -> usize {
            let bar_width = (width / BARS_YUV.len()).max(1);
            (x / bar_width + shift) % BARS_YUV.len()
        };

        let format = self.format;
        // Gray frames are encoded as full-range luminance
        let bars = if format.is_full_range() || format == PixelFormat::Gray8 {
            BARS_YUV.map(to_full_range)
        } else {
            BARS_YUV
        };
        let width = self.width;
        let height = self.height;
        for (i, plane) in frame.planes_mut().iter_mut().enumerate() {
            let (row_len, rows) = format.plane_size(i, width, height);
            let stride = plane.stride;
            for y in 0..rows {
                let row = &mut plane.data[y * stride..y * stride + row_len];
                match format {
                    PixelFormat::Rgb24 => {
                        for (x, px) in row.chunks_exact_mut(3).enumerate() {
                            px.copy_from_slice(&BARS_RGB[bar_of(x, width as usize)]);
                        }
                    }
                    PixelFormat::Gray8 => {
                        for (x, px) in row.iter_mut().enumerate() {
                            *px = bars[bar_of(x, width as usize)][0];
                        }
                    }
                    _ => {
                        // Chroma planes address bars in subsampled coordinates
                        for (x, px) in row.iter_mut().enumerate() {
                            *px = bars[bar_of(x, row_len)][i];
                        }
                    }
                }
            }
        }

        let frame = frame.with_pts(self.frame_index as i64);
        self.frame_index += 1;
        frame
    }
}

impl Iterator for TestPattern {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        Some(self.next_frame())
    }
}
