//! JPEG frame encoder
//!
//! Compresses one decoded frame into a standalone JPEG image. Every call runs
//! a fresh encode session; nothing but statistics survives between calls.

use bytes::Bytes;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

use crate::codec::library::{CodecId, MediaLibrary};
use crate::codec::native::NativeLibrary;
use crate::codec::session::EncodeSession;
use crate::constants::JPEG_MUXER;
use crate::error::CodecError;
use crate::video::Frame;

/// A complete JPEG image
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedBuffer {
    data: Bytes,
}

impl EncodedBuffer {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl Deref for EncodedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Frame to JPEG encoder
pub struct FrameEncoder<L: MediaLibrary = NativeLibrary> {
    library: L,
    /// Frames encoded successfully
    frames_encoded: AtomicU64,
    /// Encode calls that failed
    frames_failed: AtomicU64,
    /// Total bytes produced
    bytes_produced: AtomicU64,
}

impl FrameEncoder<NativeLibrary> {
    pub fn new() -> Self {
        Self::with_library(NativeLibrary::new())
    }
}

impl Default for FrameEncoder<NativeLibrary> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: MediaLibrary> FrameEncoder<L> {
    pub fn with_library(library: L) -> Self {
        Self {
            library,
            frames_encoded: AtomicU64::new(0),
            frames_failed: AtomicU64::new(0),
            bytes_produced: AtomicU64::new(0),
        }
    }

    pub fn library(&self) -> &L {
        &self.library
    }

    /// Encode `frame` as a JPEG image.
    ///
    /// The frame is only borrowed. On failure no buffer is returned and every
    /// resource acquired up to the failing step has been released.
    pub fn encode(&self, frame: &Frame) -> Result<EncodedBuffer, CodecError> {
        let start = Instant::now();
        match self.run_session(frame) {
            Ok(data) => {
                self.frames_encoded.fetch_add(1, Ordering::Relaxed);
                self.bytes_produced
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
                debug!(
                    width = frame.width(),
                    height = frame.height(),
                    format = %frame.format(),
                    bytes = data.len(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "frame encoded"
                );
                Ok(EncodedBuffer { data })
            }
            Err(e) => {
                self.frames_failed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    width = frame.width(),
                    height = frame.height(),
                    "frame encode failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    fn run_session(&self, frame: &Frame) -> Result<Bytes, CodecError> {
        let mut session = EncodeSession::new(&self.library)?;
        session.select_format(JPEG_MUXER)?;
        session.add_video_stream(CodecId::Mjpeg, frame)?;

        let encoder = self
            .library
            .find_encoder(CodecId::Mjpeg)
            .ok_or_else(|| CodecError::EncoderNotFound(CodecId::Mjpeg.to_string()))?;
        session.open_codec(encoder)?;

        session.open_sink()?;
        session.write_header()?;

        session.send_frame(frame)?;
        if let Some(packet) = session.receive_packet()? {
            session.write_packet(packet)?;
        }

        session.write_trailer()?;
        let data = session.close_sink()?;
        if data.is_empty() {
            return Err(CodecError::EmptyOutput);
        }
        Ok(data)
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        let frames_encoded = self.frames_encoded.load(Ordering::Relaxed);
        let bytes_produced = self.bytes_produced.load(Ordering::Relaxed);
        EncoderStats {
            frames_encoded,
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            bytes_produced,
            average_frame_size: if frames_encoded > 0 {
                bytes_produced as f32 / frames_encoded as f32
            } else {
                0.0
            },
        }
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.frames_failed.store(0, Ordering::Relaxed);
        self.bytes_produced.store(0, Ordering::Relaxed);
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub frames_failed: u64,
    pub bytes_produced: u64,
    pub average_frame_size: f32,
}
