//! Wires the host devices, the selected plugin and the frame loop together.

use crate::capture::{
    AcceleratorBinding, AcceleratorDevice, AcceleratorTiming, CaptureSession, PipelineLayout, UvcLink,
};
use crate::config::Config;
use crate::device::{self, DeviceFamily, HostDevices, Selection};
use crate::frame_loop::{CancelToken, FrameLoop, LoopResources, StopReason};
use crate::hotkey::{FlagRegistry, KeyboardHook};
use crate::output::{VirtualCameraConfig, VirtualCameraOutput};
use crate::plugins::{self, Plugin, PluginArgs};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use tracing::info;

pub const RESET_HELP: &str = "\
To remove all v4l2loopback devices, unload the kernel module:

    sudo modprobe -r v4l2loopback

If the module is busy, close every application using a virtual camera first.";

/// What the user asked the binary to drive.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub device_path: Option<String>,
    pub family: DeviceFamily,
    pub plugin: String,
    pub plugin_args: PluginArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Ran and was stopped by the user
    Stopped,
    /// No usable device pair, diagnostic printed
    NotReady,
}

/// Print the device table and setup commands.
pub fn list_devices(family: DeviceFamily, config: &Config) -> Result<()> {
    let source = HostDevices::default();
    let report = device::report(&source, family, &config.loopback_marker, &config.virtual_label_prefix)?;
    println!("{}", report);
    Ok(())
}

/// Resources of one run on the host.
struct HostResources<'a> {
    config: &'a Config,
    family: DeviceFamily,
    physical: String,
    virtual_path: PathBuf,
    usb_root: PathBuf,
    accelerator: Option<(PipelineLayout, Box<dyn AcceleratorBinding>)>,
}

impl LoopResources for HostResources<'_> {
    type Source = CaptureSession;
    type Sink = VirtualCameraOutput;
    type Hook = KeyboardHook;

    fn open_capture(&mut self) -> Result<CaptureSession> {
        let ceiling = self.config.ceiling();
        match self.family {
            DeviceFamily::Webcam => Ok(CaptureSession::open_webcam(&self.physical, self.config.fps, ceiling)?),
            DeviceFamily::Accelerator => {
                let (layout, binding) = self
                    .accelerator
                    .take()
                    .ok_or_else(|| anyhow!("plugin provides no accelerator binding"))?;
                let link = UvcLink::for_serial(&self.physical, &self.usb_root, ceiling.0, ceiling.1, self.config.fps)?;
                let timing = AcceleratorTiming {
                    frame_timeout: self.config.frame_timeout(),
                    stall_timeout: self.config.stall_timeout(),
                };
                let device = AcceleratorDevice::open(&self.physical, &layout, Box::new(link), ceiling, timing)?;
                let mut session = CaptureSession::accelerator(device, ceiling);
                session.configure(binding)?;
                Ok(session)
            }
        }
    }

    fn open_sink(&mut self, width: u32, height: u32) -> Result<VirtualCameraOutput> {
        Ok(VirtualCameraOutput::new(VirtualCameraConfig {
            device: self.virtual_path.clone(),
            width,
            height,
            fps: self.config.fps,
        })?)
    }

    fn install_hook(&mut self, registry: &mut FlagRegistry) -> Result<KeyboardHook> {
        Ok(KeyboardHook::install(registry, &self.config.keyboards)?)
    }
}

/// Resolve devices, build the plugin and run the frame loop until stopped.
pub fn run(request: RunRequest, config: &Config) -> Result<Outcome> {
    // Configuration problems surface before any device is touched
    let entry = plugins::find(&request.plugin, request.family)?;
    let plugin = (entry.factory)(&request.plugin_args)
        .with_context(|| format!("failed to set up plugin '{}'", entry.name))?;

    let mut registry = FlagRegistry::with_defaults()?;
    registry.register(plugin.flags())?;
    registry.apply_overrides(&config.flags);

    let source = HostDevices::default();
    let selection = device::resolve(
        &source,
        request.family,
        request.device_path.as_deref(),
        &config.loopback_marker,
        &config.virtual_label_prefix,
    )?;
    let (physical, virtual_path) = match selection {
        Selection::Exit(diagnostic) => {
            println!("{}", diagnostic);
            return Ok(Outcome::NotReady);
        }
        Selection::Run {
            physical,
            virtual_path,
            report,
        } => {
            if let Some(report) = report {
                println!("{}", report);
                println!("No device given, using {}", physical);
            }
            (physical, virtual_path)
        }
    };
    info!("Streaming {} to {} with plugin '{}'", physical, virtual_path, entry.name);

    let (transform, accelerator) = match plugin {
        Plugin::Simple(transform) => (transform, None),
        Plugin::Accelerator {
            transform,
            layout,
            binding,
        } => (transform, Some((layout, binding))),
    };

    println!("\nThe following keyboard triggers and switches are available:");
    for flag in registry.flags() {
        println!("  {:<18} {}", flag.key_combination, flag.description);
    }
    println!();

    let cancel = CancelToken::new();
    cancel.install_signal_handler()?;

    let mut resources = HostResources {
        config,
        family: request.family,
        physical,
        virtual_path: PathBuf::from(virtual_path),
        usb_root: source.usb_root().to_path_buf(),
        accelerator,
    };
    match FrameLoop::new(transform, registry, cancel).run(&mut resources)? {
        StopReason::Cancelled => Ok(Outcome::Stopped),
    }
}
