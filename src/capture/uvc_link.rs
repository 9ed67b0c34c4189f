//! Frames-only accelerator transport.
//!
//! Accelerator modules enumerate as a UVC camera in addition to their
//! inference interface. This link streams that UVC node into the device's
//! frame outputs. It has no inference channel, so detection streams stay
//! open but never receive a packet.

use super::accelerator::{AcceleratorLink, Packet, StreamKind, StreamWriter};
use super::{CaptureBackend, CaptureConfig, NokhwaCapture};
use crate::device::{trailing_integer, ACCELERATOR_VENDOR_ID};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long `start` waits for the UVC stream to come up.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UvcLink {
    serial: String,
    device_index: u32,
    config: CaptureConfig,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frame_size: Option<(u32, u32)>,
    // Keeps detection streams connected
    idle: Vec<StreamWriter>,
}

impl UvcLink {
    /// Locate the UVC node of the accelerator with `serial` under `usb_root`.
    pub fn for_serial(serial: &str, usb_root: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        let device_index = find_video_node(usb_root, serial)?;
        debug!("Accelerator {} exposes /dev/video{}", serial, device_index);
        Ok(Self {
            serial: serial.to_string(),
            device_index,
            config: CaptureConfig {
                device_index,
                width,
                height,
                fps,
            },
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            frame_size: None,
            idle: Vec::new(),
        })
    }
}

impl AcceleratorLink for UvcLink {
    fn start(&mut self, writers: Vec<StreamWriter>) -> Result<()> {
        let (frames, idle): (Vec<_>, Vec<_>) = writers.into_iter().partition(|w| w.kind() == StreamKind::Frames);
        for writer in &idle {
            info!("Stream '{}' has no producer on the UVC link", writer.name());
        }
        self.idle = idle;
        if frames.is_empty() {
            bail!("pipeline declares no frame stream");
        }

        // nokhwa handles are not Send, so the camera is opened on the worker
        let (ready_tx, ready_rx) = flume::bounded::<Result<(u32, u32)>>(1);
        let config = self.config.clone();
        let stop = self.stop.clone();
        let worker = thread::Builder::new()
            .name(format!("uvc-{}", self.serial))
            .spawn(move || {
                let mut camera = match NokhwaCapture::open(config) {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(camera.frame_size()));
                        camera
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                pump(&mut camera, &frames, &stop);
                camera.stop();
            })
            .context("failed to start UVC worker")?;
        self.worker = Some(worker);

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok((width, height))) => {
                info!("UVC link up on /dev/video{} ({}x{})", self.device_index, width, height);
                // Frames are clamped to the requested size on acquisition
                self.frame_size = Some((width.min(self.config.width), height.min(self.config.height)));
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e.context(format!("failed to open /dev/video{}", self.device_index)))
            }
            Err(_) => {
                self.stop();
                bail!("/dev/video{} did not start streaming", self.device_index)
            }
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("UVC worker panicked");
            }
        }
        self.idle.clear();
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        self.frame_size
    }
}

fn pump(camera: &mut NokhwaCapture, writers: &[StreamWriter], stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let frame = match camera.capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                // Dropping the writers disconnects the consumers
                warn!("UVC capture failed: {:#}", e);
                return;
            }
        };
        let (last, rest) = match writers.split_last() {
            Some(split) => split,
            None => return,
        };
        for writer in rest {
            writer.push(Packet::Frame(frame.clone()));
        }
        if !last.push(Packet::Frame(frame)) {
            return;
        }
    }
}

/// Index of the `/dev/video<n>` node exported by the USB device with `serial`.
fn find_video_node(usb_root: &Path, serial: &str) -> Result<u32> {
    let entries = fs::read_dir(usb_root).with_context(|| format!("failed to read {:?}", usb_root))?;
    for entry in entries.flatten() {
        let dir = entry.path();
        let vendor = read_attr(&dir, "idVendor");
        if vendor.as_deref() != Some(ACCELERATOR_VENDOR_ID) || read_attr(&dir, "serial").as_deref() != Some(serial) {
            continue;
        }
        let mut nodes = video_nodes(&dir);
        nodes.sort_unstable();
        if let Some(index) = nodes.first() {
            return Ok(*index);
        }
    }
    bail!("accelerator {} exposes no video4linux node", serial)
}

/// `<interface>/video4linux/video<n>` entries below a USB device directory.
fn video_nodes(device_dir: &Path) -> Vec<u32> {
    let Ok(interfaces) = fs::read_dir(device_dir) else {
        return Vec::new();
    };
    interfaces
        .flatten()
        .map(|iface| iface.path().join("video4linux"))
        .filter_map(|v4l| fs::read_dir(v4l).ok())
        .flat_map(|nodes| nodes.flatten().collect::<Vec<_>>())
        .filter_map(|node| {
            let name = node.file_name();
            let name = name.to_str()?;
            if name.starts_with("video") {
                trailing_integer(name)
            } else {
                None
            }
        })
        .collect()
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(PathBuf::from(dir).join(name))
        .ok()
        .map(|s| s.trim().to_string())
}
