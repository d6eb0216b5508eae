//! # Frame Publisher
//!
//! Compresses decoded video frames to JPEG and publishes each image as one
//! message to any number of remote subscribers, with a control channel for
//! inbound signals.
//!
//! ## Architecture Overview
//!
//! ```text
//! Frame source
//!      │ &Frame
//!      ▼
//! FrameEncoder ── one mjpeg session per frame (codec)
//!      │ JPEG bytes
//!      ▼
//! FramePublisher ──▶ SocketManager.publisher()  PUB tcp://*:5555
//!                                                 │
//!                                                 ▼
//!                                        remote subscribers
//!
//! remote controller
//!      │
//!      ▼
//! SUB tcp://127.0.0.1:5556  SocketManager.subscriber()
//!      │
//!      ▼
//! ControlReceiver ── arrival only, payload discarded
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod network;
pub mod publisher;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use crate::codec::Rational;

    /// Default publish endpoint, all interfaces
    pub const DEFAULT_PUBLISH_ENDPOINT: &str = "tcp://*:5555";
    pub const DEFAULT_PUBLISH_PORT: u16 = 5555;

    /// Default control endpoint, loopback only
    pub const DEFAULT_CONTROL_ENDPOINT: &str = "tcp://127.0.0.1:5556";
    pub const DEFAULT_CONTROL_PORT: u16 = 5556;

    /// Receive buffer for control messages
    pub const CONTROL_BUFFER_SIZE: usize = 1024;

    /// Muxer used for single-image output
    pub const JPEG_MUXER: &str = "mjpeg";

    /// JPEG quality (1-100)
    pub const JPEG_QUALITY: u8 = 90;

    /// Nominal frame rate of the output stream
    pub const STREAM_FPS: i32 = 25;

    /// Output stream time base, independent of the input
    pub const STREAM_TIME_BASE: Rational = Rational::new(1, STREAM_FPS);

    pub const DEFAULT_LISTEN_BACKLOG: i32 = 128;

    pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1000;

    pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 1000;

    /// Messages a subscribe socket holds before dropping new arrivals
    pub const DEFAULT_RECEIVE_QUEUE_LEN: usize = 128;

    /// Largest message a subscriber accepts
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
}
