//! rollcall-hw — camera capture for the attendance loop.
//!
//! V4L2 capture via the `v4l` crate, with every negotiated pixel format
//! reduced to 8-bit grayscale frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureDevice, FrameSource, LiveFeed};
pub use frame::{Frame, FrameError, PixelFormat};
