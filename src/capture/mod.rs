//! Physical camera capture.
//!
//! A [`CaptureSession`] owns one physical device handle and hides whether
//! frames come from a plain webcam or from an accelerator module with
//! on-device inference. Every acquired frame is clamped to the resolution
//! ceiling before it is returned.

mod accelerator;
#[cfg(target_os = "linux")]
mod nokhwa_backend;
#[cfg(target_os = "linux")]
mod uvc_link;

pub use accelerator::{
    AcceleratorDevice, AcceleratorLink, AcceleratorTiming, OutputQueue, Packet, PipelineLayout, StreamKind,
    StreamWriter,
};
#[cfg(target_os = "linux")]
pub use nokhwa_backend::NokhwaCapture;
#[cfg(target_os = "linux")]
pub use uvc_link::UvcLink;

use crate::error::CaptureError;
use crate::frame::VideoFrame;
use anyhow::Result;
use tracing::{debug, info};

/// Trait for plain frame-grabber backends.
pub trait CaptureBackend {
    /// Captures a single frame from the camera.
    fn capture_frame(&mut self) -> Result<VideoFrame>;

    /// Returns the native frame dimensions.
    fn frame_size(&self) -> (u32, u32);

    /// Stops streaming. Called once when the session is released.
    fn stop(&mut self) {}
}

/// Configuration for camera capture.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Camera device index, the `<n>` of `/dev/video<n>`
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl CaptureConfig {
    /// Request for the node at `path`, asking for the ceiling as the capture size.
    pub fn for_path(path: &str, fps: u32, ceiling: (u32, u32)) -> Result<Self, CaptureError> {
        let device_index = crate::device::trailing_integer(path).ok_or_else(|| CaptureError::Open {
            path: path.to_string(),
            reason: "path does not end in a device index".to_string(),
        })?;
        Ok(Self {
            device_index,
            width: ceiling.0,
            height: ceiling.1,
            fps,
        })
    }
}

/// One object found by on-device inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: u32,
    pub confidence: f32,
    /// Normalized corners: xmin, ymin, xmax, ymax in 0..=1
    pub bbox: [f32; 4],
}

/// Detections delivered alongside a frame by an accelerator backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
    pub detections: Vec<Detection>,
}

/// A frame plus whatever detections arrived with it.
pub type Acquired = (VideoFrame, Option<DetectionSet>);

/// Anything the frame loop can pull frames from.
pub trait FrameSource {
    fn acquire(&mut self) -> Result<Acquired, CaptureError>;

    /// Size of the frames `acquire` returns.
    fn frame_size(&self) -> (u32, u32);
}

/// Plugin-supplied half of an accelerator session.
///
/// Different accelerator pipelines expose different outputs, so the plugin
/// binds the queues it needs in `device_setup` and decides in `acquisition`
/// how to pull one frame and its detections.
pub trait AcceleratorBinding: Send {
    /// Runs once before the first acquisition.
    fn device_setup(&mut self, device: &mut AcceleratorDevice) -> Result<(), CaptureError>;

    fn acquisition(&mut self, device: &mut AcceleratorDevice) -> Result<Acquired, CaptureError>;
}

enum SessionBackend {
    Plain(Box<dyn CaptureBackend>),
    Accelerator {
        device: AcceleratorDevice,
        binding: Option<Box<dyn AcceleratorBinding>>,
    },
}

/// Exclusive owner of one physical camera for the lifetime of a run.
pub struct CaptureSession {
    path: String,
    backend: SessionBackend,
    ceiling: (u32, u32),
    released: bool,
}

impl CaptureSession {
    /// Wrap an opened frame grabber.
    pub fn plain(path: impl Into<String>, backend: Box<dyn CaptureBackend>, ceiling: (u32, u32)) -> Self {
        let path = path.into();
        info!("Capture session opened on {}", path);
        Self {
            path,
            backend: SessionBackend::Plain(backend),
            ceiling,
            released: false,
        }
    }

    /// Wrap an opened accelerator. [`configure`](Self::configure) must follow.
    pub fn accelerator(device: AcceleratorDevice, ceiling: (u32, u32)) -> Self {
        let path = device.serial().to_string();
        info!("Accelerator session opened on {}", path);
        Self {
            path,
            backend: SessionBackend::Accelerator { device, binding: None },
            ceiling,
            released: false,
        }
    }

    /// Open `/dev/video<n>` through nokhwa.
    #[cfg(target_os = "linux")]
    pub fn open_webcam(path: &str, fps: u32, ceiling: (u32, u32)) -> Result<Self, CaptureError> {
        let config = CaptureConfig::for_path(path, fps, ceiling)?;
        let backend = NokhwaCapture::open(config).map_err(|e| CaptureError::Open {
            path: path.to_string(),
            reason: format!("{:#}", e),
        })?;
        Ok(Self::plain(path, Box::new(backend), ceiling))
    }

    /// Bind the plugin's queues and acquisition strategy. Accelerator sessions only, exactly once.
    pub fn configure(&mut self, mut binding: Box<dyn AcceleratorBinding>) -> Result<(), CaptureError> {
        match &mut self.backend {
            SessionBackend::Plain(_) => Err(CaptureError::NotAccelerator),
            SessionBackend::Accelerator { binding: Some(_), .. } => Err(CaptureError::AlreadyConfigured),
            SessionBackend::Accelerator { device, binding: slot } => {
                binding.device_setup(device)?;
                debug!("Accelerator {} configured", self.path);
                *slot = Some(binding);
                Ok(())
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stop the device. Also happens on drop; running it twice is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match &mut self.backend {
            SessionBackend::Plain(backend) => backend.stop(),
            SessionBackend::Accelerator { device, .. } => device.close(),
        }
        info!("Capture session on {} released", self.path);
    }
}

impl FrameSource for CaptureSession {
    fn acquire(&mut self) -> Result<Acquired, CaptureError> {
        let (frame, detections) = match &mut self.backend {
            SessionBackend::Plain(backend) => {
                let frame = backend.capture_frame().map_err(|e| CaptureError::Grab {
                    path: self.path.clone(),
                    reason: format!("{:#}", e),
                })?;
                (frame, None)
            }
            SessionBackend::Accelerator { binding: None, .. } => return Err(CaptureError::NotConfigured),
            SessionBackend::Accelerator {
                device,
                binding: Some(binding),
            } => binding.acquisition(device)?,
        };

        let (max_width, max_height) = self.ceiling;
        let frame = frame
            .enforce_ceiling(max_width, max_height)
            .map_err(|e| CaptureError::Grab {
                path: self.path.clone(),
                reason: format!("{:#}", e),
            })?;
        Ok((frame, detections))
    }

    fn frame_size(&self) -> (u32, u32) {
        let (width, height) = match &self.backend {
            SessionBackend::Plain(backend) => backend.frame_size(),
            SessionBackend::Accelerator { device, .. } => device.frame_size(),
        };
        (width.min(self.ceiling.0), height.min(self.ceiling.1))
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
