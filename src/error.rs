//! Error types for the frame publisher

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad classes of encode failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// A format, codec or sink resource could not be created or opened
    Allocation,
    /// The requested muxer or encoder is not available
    Lookup,
    /// The encoder or muxer rejected a submit, receive or write
    Protocol,
}

/// Frame encoding errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Output format not found: {0}")]
    FormatNotFound(String),

    #[error("No encoder available for codec {0}")]
    EncoderNotFound(String),

    #[error("Invalid codec parameters: {0}")]
    InvalidParameters(String),

    #[error("Unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Muxing failed: {0}")]
    MuxingFailed(String),

    #[error("Encoder produced no output")]
    EmptyOutput,
}

impl CodecError {
    pub fn kind(&self) -> CodecErrorKind {
        match self {
            CodecError::Allocation(_)
            | CodecError::InvalidParameters(_)
            | CodecError::UnsupportedPixelFormat(_) => CodecErrorKind::Allocation,
            CodecError::FormatNotFound(_) | CodecError::EncoderNotFound(_) => {
                CodecErrorKind::Lookup
            }
            CodecError::InvalidFrame(_)
            | CodecError::EncodingFailed(_)
            | CodecError::MuxingFailed(_)
            | CodecError::EmptyOutput => CodecErrorKind::Protocol,
        }
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Socket creation failed: {0}")]
    SocketFailed(String),

    #[error("Bind to {endpoint} failed: {reason}")]
    BindFailed { endpoint: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Socket is closed")]
    Closed,

    #[error("Timeout")]
    Timeout,

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
