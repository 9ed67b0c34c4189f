//! Nokhwa-based webcam capture backend.

use super::{CaptureBackend, CaptureConfig};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::Result;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{debug, info, warn};

/// Webcam capture using the nokhwa library.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl NokhwaCapture {
    /// Open `/dev/video<device_index>` and start streaming.
    ///
    /// Picky drivers reject a `Closest` request whose hint is far from what
    /// they support, so a short list of common formats is tried until one
    /// actually streams. Formats at or below the requested size come first
    /// since anything larger is scaled down afterwards anyway.
    pub fn open(config: CaptureConfig) -> Result<Self> {
        let mut seeds: Vec<CameraFormat> = Vec::new();
        for (width, height) in [(config.width, config.height), (1280, 720), (640, 480), (1920, 1080)] {
            for format in [FrameFormat::MJPEG, FrameFormat::YUYV, FrameFormat::NV12] {
                let seed = CameraFormat::new(Resolution::new(width, height), format, config.fps);
                if !seeds.contains(&seed) {
                    seeds.push(seed);
                }
            }
        }

        let index = CameraIndex::Index(config.device_index);
        let mut opened = None;
        for seed in seeds {
            let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(seed));
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => {
                    // Creating the handle is not enough for some drivers
                    match camera.open_stream() {
                        Ok(()) => {
                            debug!("Camera {} streams with seed format {:?}", config.device_index, seed);
                            opened = Some(camera);
                            break;
                        }
                        Err(e) => debug!("Seed format {:?} rejected: {}", seed, e),
                    }
                }
                Err(e) => debug!("Seed format {:?} rejected: {}", seed, e),
            }
        }

        let camera = opened.ok_or_else(|| {
            anyhow::anyhow!(
                "could not open a stream on /dev/video{} with any standard format",
                config.device_index
            )
        })?;

        let resolution = camera.resolution();
        info!(
            "Camera /dev/video{} opened at {} ({:?})",
            config.device_index,
            resolution,
            camera.frame_format()
        );

        Ok(Self {
            camera,
            width: resolution.width(),
            height: resolution.height(),
        })
    }
}

impl CaptureBackend for NokhwaCapture {
    fn capture_frame(&mut self) -> Result<VideoFrame> {
        let frame = self.camera.frame()?;
        let decoded = frame.decode_image::<RgbFormat>()?;
        let (width, height) = decoded.dimensions();
        if (width, height) != (self.width, self.height) {
            debug!("Camera switched to {}x{}", width, height);
            self.width = width;
            self.height = height;
        }
        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to stop camera stream: {}", e);
        }
    }
}
