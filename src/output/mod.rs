//! Virtual camera outputs.

#[cfg(target_os = "linux")]
mod virtual_camera_linux;

#[cfg(target_os = "linux")]
pub use virtual_camera_linux::{VirtualCameraConfig, VirtualCameraOutput};

use crate::error::SinkError;
use crate::frame::{PixelFormat, VideoFrame};

/// Where processed frames go.
///
/// The sink owns frame-rate pacing: the loop calls `send` once and then
/// `wait_next_frame` once per iteration.
pub trait FrameSink {
    /// Pixel layout `send` expects.
    fn pixel_format(&self) -> PixelFormat;

    /// Publish one frame. Frames not matching the geometry declared at open are rejected.
    fn send(&mut self, frame: &VideoFrame) -> Result<(), SinkError>;

    /// Block until the next frame is due.
    fn wait_next_frame(&mut self);
}
