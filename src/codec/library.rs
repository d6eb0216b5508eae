//! Media library interface
//!
//! The encoder drives a container/codec library through the operations
//! below, one call per protocol step. Contexts handed out by a library are
//! released through `free_codec_context` / `free_output_context` only.

use bytes::Bytes;
use std::fmt;

use crate::error::CodecError;
use crate::video::{Frame, PixelFormat};

/// Codec identifiers known to the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Mjpeg,
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecId::Mjpeg => f.write_str("mjpeg"),
        }
    }
}

/// A rational number, used for time bases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Parameters of the output video stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamParams {
    pub codec_id: CodecId,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
}

/// Descriptor of a muxer
#[derive(Debug)]
pub struct OutputFormat {
    pub name: &'static str,
    pub video_codec: CodecId,
}

/// Descriptor of an encoder implementation
#[derive(Debug)]
pub struct EncoderInfo {
    pub name: &'static str,
    pub id: CodecId,
    pub pixel_formats: &'static [PixelFormat],
}

impl EncoderInfo {
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.pixel_formats.contains(&format)
    }
}

/// One encoded unit
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Bytes,
    pub stream_index: usize,
    pub pts: Option<i64>,
}

/// Outcome of asking the encoder for output
#[derive(Debug)]
pub enum Received {
    Packet(Packet),
    /// More input is needed before output is available
    Again,
    /// The encoder has been drained
    Eof,
}

/// Container and codec operations used by the frame encoder
pub trait MediaLibrary {
    /// Output (muxer) context, which also owns the attached sink
    type Format;
    /// Opened encoder context
    type Codec;

    /// Allocate an empty output context with no destination
    fn alloc_output_context(&self) -> Result<Self::Format, CodecError>;

    /// Resolve a muxer by name and bind it to the context
    fn guess_output_format(&self, ctx: &mut Self::Format, name: &str) -> Result<(), CodecError>;

    /// Attach a new stream, returning its index
    fn new_stream(&self, ctx: &mut Self::Format, params: StreamParams) -> Result<usize, CodecError>;

    /// Look up an encoder implementation for a codec
    fn find_encoder(&self, id: CodecId) -> Option<&'static EncoderInfo>;

    /// Build an encoder context from a stream's parameters and open it
    fn open_codec(
        &self,
        encoder: &'static EncoderInfo,
        ctx: &Self::Format,
        stream_index: usize,
    ) -> Result<Self::Codec, CodecError>;

    /// Attach a growable in-memory sink as the context's output
    fn open_dyn_buf(&self, ctx: &mut Self::Format) -> Result<(), CodecError>;

    fn write_header(&self, ctx: &mut Self::Format) -> Result<(), CodecError>;

    /// Submit one frame to the encoder
    fn send_frame(&self, codec: &mut Self::Codec, frame: &Frame) -> Result<(), CodecError>;

    fn receive_packet(&self, codec: &mut Self::Codec) -> Result<Received, CodecError>;

    /// Write a packet; the packet is consumed
    fn write_packet(&self, ctx: &mut Self::Format, packet: Packet) -> Result<(), CodecError>;

    fn write_trailer(&self, ctx: &mut Self::Format) -> Result<(), CodecError>;

    /// Detach the sink and return everything written to it
    fn close_dyn_buf(&self, ctx: &mut Self::Format) -> Result<Bytes, CodecError>;

    fn free_codec_context(&self, codec: &mut Self::Codec);

    /// Free the context, closing the sink if it is still attached
    fn free_output_context(&self, ctx: &mut Self::Format);
}
