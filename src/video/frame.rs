//! Decoded video frames
//!
//! A `Frame` is a raster image laid out in one or more pixel planes. Frames are
//! owned by the caller; the encoder only ever borrows them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CodecError;

/// Pixel layouts accepted by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, limited range
    Yuv420p,
    /// Planar YUV 4:2:0, full (JPEG) range
    Yuvj420p,
    /// Planar YUV 4:2:2, limited range
    Yuv422p,
    /// Planar YUV 4:2:2, full range
    Yuvj422p,
    /// Planar YUV 4:4:4, limited range
    Yuv444p,
    /// Planar YUV 4:4:4, full range
    Yuvj444p,
    /// Single 8-bit luma plane
    Gray8,
    /// Packed 8-bit RGB
    Rgb24,
}

impl PixelFormat {
    pub fn name(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuvj420p => "yuvj420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuvj422p => "yuvj422p",
            PixelFormat::Yuv444p => "yuv444p",
            PixelFormat::Yuvj444p => "yuvj444p",
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Rgb24 => "rgb24",
        }
    }

    pub fn is_planar_yuv(&self) -> bool {
        !matches!(self, PixelFormat::Gray8 | PixelFormat::Rgb24)
    }

    /// Full-range YUV uses the whole 0..=255 span for luma and chroma
    pub fn is_full_range(&self) -> bool {
        matches!(
            self,
            PixelFormat::Yuvj420p | PixelFormat::Yuvj422p | PixelFormat::Yuvj444p
        )
    }

    pub fn plane_count(&self) -> usize {
        if self.is_planar_yuv() {
            3
        } else {
            1
        }
    }

    /// Horizontal and vertical chroma subsampling as log2 shifts
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p => (1, 1),
            PixelFormat::Yuv422p | PixelFormat::Yuvj422p => (1, 0),
            _ => (0, 0),
        }
    }

    /// Minimum bytes per row and row count of `plane` for a `width`×`height` image
    pub fn plane_size(&self, plane: usize, width: u32, height: u32) -> (usize, usize) {
        let (w, h) = (width as usize, height as usize);
        match (self, plane) {
            (PixelFormat::Rgb24, _) => (w * 3, h),
            (_, 0) => (w, h),
            _ => {
                let (sx, sy) = self.chroma_shift();
                (ceil_shift(w, sx), ceil_shift(h, sy))
            }
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn ceil_shift(value: usize, shift: u32) -> usize {
    (value + (1 << shift) - 1) >> shift
}

/// One plane of pixel data
#[derive(Clone, Debug)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Row `y`, `len` bytes wide
    pub fn row(&self, y: usize, len: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + len]
    }
}

/// A decoded video frame
#[derive(Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    /// Presentation timestamp in stream time base units
    pts: Option<i64>,
}

impl Frame {
    /// Wrap existing planes. No validation is done here; the encoder
    /// rejects malformed frames.
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
            pts: None,
        }
    }

    /// Allocate a zeroed frame with tightly packed planes
    pub fn alloc(width: u32, height: u32, format: PixelFormat) -> Self {
        let planes = (0..format.plane_count())
            .map(|i| {
                let (row, rows) = format.plane_size(i, width, height);
                Plane::new(vec![0u8; row * rows], row)
            })
            .collect();
        Self::new(width, height, format, planes)
    }

    /// Frame filled with a single colour.
    ///
    /// `color` is interpreted per format: `[y, u, v]` for YUV, `[r, g, b]` for
    /// RGB and `[luma, _, _]` for gray.
    pub fn solid(width: u32, height: u32, format: PixelFormat, color: [u8; 3]) -> Self {
        let mut frame = Self::alloc(width, height, format);
        match format {
            PixelFormat::Rgb24 => {
                for px in frame.planes[0].data.chunks_exact_mut(3) {
                    px.copy_from_slice(&color);
                }
            }
            PixelFormat::Gray8 => frame.planes[0].data.fill(color[0]),
            _ => {
                for (plane, value) in frame.planes.iter_mut().zip(color) {
                    plane.data.fill(value);
                }
            }
        }
        frame
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [Plane] {
        &mut self.planes
    }

    /// Check that plane count, strides and buffer lengths cover the image
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidFrame(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        if self.planes.len() != self.format.plane_count() {
            return Err(CodecError::InvalidFrame(format!(
                "{} expects {} planes, got {}",
                self.format,
                self.format.plane_count(),
                self.planes.len()
            )));
        }
        for (i, plane) in self.planes.iter().enumerate() {
            let (row, rows) = self.format.plane_size(i, self.width, self.height);
            if plane.stride < row {
                return Err(CodecError::InvalidFrame(format!(
                    "plane {} stride {} is shorter than a row of {} bytes",
                    i, plane.stride, row
                )));
            }
            let needed = plane
                .stride
                .checked_mul(rows - 1)
                .and_then(|n| n.checked_add(row))
                .ok_or_else(|| {
                    CodecError::InvalidFrame(format!(
                        "plane {} stride {} overflows the address space",
                        i, plane.stride
                    ))
                })?;
            if plane.data.len() < needed {
                return Err(CodecError::InvalidFrame(format!(
                    "plane {} holds {} bytes, needs {}",
                    i,
                    plane.data.len(),
                    needed
                )));
            }
        }
        Ok(())
    }
}
