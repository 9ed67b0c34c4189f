//! Linux virtual camera output using v4l2loopback.
//!
//! Frames are written as raw YUYV to the loopback node through a
//! non-blocking descriptor, one `write` per frame. A full loopback buffer
//! or a short write drops the frame.

use super::FrameSink;
use crate::error::SinkError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::utils::FramePacer;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use tracing::{debug, info, warn};

// _IOWR('V', 5, struct v4l2_format)
const VIDIOC_S_FMT: libc::c_ulong = 0xC0D05605;
const V4L2_BUF_TYPE_VIDEO_OUTPUT: u32 = 2;
const V4L2_FIELD_NONE: u32 = 1;
const V4L2_COLORSPACE_SRGB: u32 = 8;
const V4L2_PIX_FMT_YUYV: u32 = u32::from_le_bytes(*b"YUYV");

#[repr(C)]
struct V4l2Format {
    type_: u32,
    fmt: V4l2FormatUnion,
}

#[repr(C)]
union V4l2FormatUnion {
    pix: V4l2PixFormat,
    raw_data: [u8; 200],
    // The kernel union contains pointers
    _align: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct V4l2PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

/// Geometry and rate the sink is opened with.
#[derive(Debug, Clone)]
pub struct VirtualCameraConfig {
    /// Loopback node chosen by the device selector
    pub device: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Virtual camera output using v4l2loopback.
pub struct VirtualCameraOutput {
    config: VirtualCameraConfig,
    device: File,
    pacer: FramePacer,
    dropped: u64,
}

impl VirtualCameraOutput {
    pub fn new(config: VirtualCameraConfig) -> Result<Self, SinkError> {
        let device = Self::open_and_configure_device(&config)?;
        info!(
            "Virtual camera output opened on {} ({}x{} @ {} fps, YUYV)",
            config.device.display(),
            config.width,
            config.height,
            config.fps
        );
        Ok(Self {
            pacer: FramePacer::new(config.fps),
            config,
            device,
            dropped: 0,
        })
    }

    fn open_and_configure_device(config: &VirtualCameraConfig) -> Result<File, SinkError> {
        let path = &config.device;
        if !path.exists() {
            return Err(SinkError::MissingDevice(path.clone()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| SinkError::Open {
                path: path.clone(),
                source,
            })?;

        let pix = V4l2PixFormat {
            width: config.width,
            height: config.height,
            pixelformat: V4L2_PIX_FMT_YUYV,
            field: V4L2_FIELD_NONE,
            bytesperline: config.width * 2,
            sizeimage: config.width * config.height * 2,
            colorspace: V4L2_COLORSPACE_SRGB,
            priv_: 0,
            flags: 0,
            ycbcr_enc: 0,
            quantization: 0,
            xfer_func: 0,
        };
        let mut fmt = V4l2Format {
            type_: V4L2_BUF_TYPE_VIDEO_OUTPUT,
            fmt: V4l2FormatUnion { pix },
        };

        // SAFETY: fd is open for the duration of the call and fmt matches the
        // kernel's struct v4l2_format layout.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), VIDIOC_S_FMT, &mut fmt) };
        if rc < 0 {
            let source = io::Error::last_os_error();
            return Err(SinkError::Open {
                path: path.clone(),
                source,
            });
        }
        debug!("Set {} to YUYV {}x{}", path.display(), config.width, config.height);
        Ok(file)
    }
}

impl FrameSink for VirtualCameraOutput {
    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Yuyv
    }

    fn send(&mut self, frame: &VideoFrame) -> Result<(), SinkError> {
        if frame.format != PixelFormat::Yuyv || (frame.width, frame.height) != (self.config.width, self.config.height) {
            return Err(SinkError::GeometryMismatch {
                width: self.config.width,
                height: self.config.height,
                got_width: frame.width,
                got_height: frame.height,
            });
        }

        if !publish(&mut self.device, &frame.data).map_err(SinkError::Write)? {
            self.dropped += 1;
            warn!("v4l2loopback buffer full, frame dropped ({} so far)", self.dropped);
        }
        Ok(())
    }

    fn wait_next_frame(&mut self) {
        self.pacer.wait();
    }
}

/// Hand one frame to the loopback driver in a single `write`.
///
/// `false` when the frame was not taken whole: the buffer was full, or the
/// driver accepted only part of it. A retry would splice the rest of this
/// frame onto the start of the next one, so the remainder is dropped.
fn publish(out: &mut impl Write, data: &[u8]) -> io::Result<bool> {
    match out.write(data) {
        Ok(written) => Ok(written == data.len()),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

impl Drop for VirtualCameraOutput {
    fn drop(&mut self) {
        info!("Virtual camera output on {} released", self.config.device.display());
    }
}
