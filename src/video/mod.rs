//! Video frame model and sources

pub mod frame;
pub mod pattern;

pub use frame::{Frame, PixelFormat, Plane};
pub use pattern::TestPattern;
