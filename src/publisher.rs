//! Frame publisher
//!
//! Encodes a frame and sends the JPEG as one message on the publish socket.
//! Each call is independent: nothing is queued or retried.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::codec::{FrameEncoder, MediaLibrary, NativeLibrary};
use crate::error::Result;
use crate::network::{PublishSocket, SocketId, SocketManager, Transport};
use crate::video::Frame;

/// Outcome of a successful publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub socket: SocketId,
    pub bytes: usize,
}

/// Publishes frames through a shared `SocketManager`
pub struct FramePublisher<'a, T: Transport, L: MediaLibrary = NativeLibrary> {
    sockets: &'a SocketManager<T>,
    encoder: FrameEncoder<L>,
    frames_published: AtomicU64,
    bytes_published: AtomicU64,
    send_failures: AtomicU64,
}

impl<'a, T: Transport> FramePublisher<'a, T, NativeLibrary> {
    pub fn new(sockets: &'a SocketManager<T>) -> Self {
        Self::with_encoder(sockets, FrameEncoder::new())
    }
}

impl<'a, T: Transport, L: MediaLibrary> FramePublisher<'a, T, L> {
    pub fn with_encoder(sockets: &'a SocketManager<T>, encoder: FrameEncoder<L>) -> Self {
        Self {
            sockets,
            encoder,
            frames_published: AtomicU64::new(0),
            bytes_published: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    pub fn encoder(&self) -> &FrameEncoder<L> {
        &self.encoder
    }

    /// Encode `frame` and publish it.
    ///
    /// The publish socket is bound on first use. Nothing is sent if encoding
    /// fails; a send failure is reported as a network error.
    pub fn publish_frame(&self, frame: &Frame) -> Result<PublishReceipt> {
        let socket = self.sockets.publisher()?;
        let jpeg = self.encoder.encode(frame)?;

        let bytes = socket.send(&jpeg).map_err(|e| {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
            e
        })?;

        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.bytes_published
            .fetch_add(bytes as u64, Ordering::Relaxed);
        debug!("published {} bytes on socket {}", bytes, socket.id());

        Ok(PublishReceipt {
            socket: socket.id(),
            bytes,
        })
    }

    /// Get statistics
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            bytes_published: self.bytes_published.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            encode_failures: self.encoder.stats().frames_failed,
        }
    }
}

/// Publisher statistics
#[derive(Debug, Clone)]
pub struct PublisherStats {
    pub frames_published: u64,
    pub bytes_published: u64,
    pub send_failures: u64,
    pub encode_failures: u64,
}
