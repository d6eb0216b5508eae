//! JPEG frame encoding
//!
//! `FrameEncoder` drives a `MediaLibrary` through a one-shot mux/encode
//! session per frame. `NativeLibrary` is the built-in implementation.

pub mod encoder;
pub mod library;
pub mod native;
mod session;

pub use encoder::{EncodedBuffer, EncoderStats, FrameEncoder};
pub use library::{CodecId, MediaLibrary, Rational};
pub use native::NativeLibrary;
