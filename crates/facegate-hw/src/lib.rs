//! facegate-hw — Frame source for the camera-polling daemon variant.
//!
//! Provides V4L2-based single-frame capture, converting negotiated YUYV
//! or GREY buffers to the grayscale frames the embedding provider expects.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, PixelFormat};
pub use frame::Frame;
