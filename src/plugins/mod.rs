//! Per-frame transform plugins and the registry that names them.

mod face_detection;
mod object_overlay;
mod passthrough;

pub use face_detection::FaceDetection;
pub use object_overlay::{ObjectOverlay, ObjectOverlayBinding, COCO_LABELS};
pub use passthrough::Passthrough;

use crate::capture::{AcceleratorBinding, DetectionSet, PipelineLayout};
use crate::device::DeviceFamily;
use crate::draw::Canvas;
use crate::error::ConfigError;
use crate::frame::{PixelFormat, VideoFrame};
use crate::hotkey::{FlagSnapshot, PipelineFlag};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Image processing run once per frame.
pub trait Transform {
    /// Flags this transform wants registered next to the defaults.
    fn flags(&self) -> Vec<PipelineFlag> {
        Vec::new()
    }

    /// Process one RGB frame. `detections` is only valid for this call.
    fn process(&mut self, frame: VideoFrame, detections: Option<&DetectionSet>, flags: &FlagSnapshot) -> Result<VideoFrame>;
}

/// An instantiated plugin.
pub enum Plugin {
    Simple(Box<dyn Transform>),
    Accelerator {
        transform: Box<dyn Transform>,
        /// Streams the device must publish
        layout: PipelineLayout,
        binding: Box<dyn AcceleratorBinding>,
    },
}

impl Plugin {
    pub fn family(&self) -> DeviceFamily {
        match self {
            Plugin::Simple(_) => DeviceFamily::Webcam,
            Plugin::Accelerator { .. } => DeviceFamily::Accelerator,
        }
    }

    pub fn flags(&self) -> Vec<PipelineFlag> {
        match self {
            Plugin::Simple(transform) | Plugin::Accelerator { transform, .. } => transform.flags(),
        }
    }
}

/// Extra command line arguments handed to a plugin factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginArgs {
    values: BTreeMap<String, String>,
}

impl PluginArgs {
    /// Parse `--name value` pairs. Anything else is rejected.
    pub fn parse(args: &[String]) -> Result<Self, ConfigError> {
        let malformed = || ConfigError::MalformedPluginArguments(args.join(" "));
        if args.len() % 2 != 0 {
            return Err(malformed());
        }
        let mut values = BTreeMap::new();
        for pair in args.chunks_exact(2) {
            let name = pair[0].strip_prefix("--").filter(|n| !n.is_empty()).ok_or_else(malformed)?;
            if pair[1].starts_with("--") || values.insert(name.to_string(), pair[1].clone()).is_some() {
                return Err(malformed());
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn require(&self, plugin: &str, name: &str) -> Result<&str, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::MissingPluginArgument {
            plugin: plugin.to_string(),
            argument: format!("--{}", name),
        })
    }

    /// Fail on any argument not in `known`.
    pub fn allow_only(&self, plugin: &str, known: &[&str]) -> Result<(), ConfigError> {
        match self.values.keys().find(|k| !known.contains(&k.as_str())) {
            Some(unknown) => Err(ConfigError::InvalidPluginArgument {
                plugin: plugin.to_string(),
                reason: format!("unknown argument '--{}'", unknown),
            }),
            None => Ok(()),
        }
    }
}

pub type PluginFactory = fn(&PluginArgs) -> Result<Plugin>;

pub struct PluginEntry {
    pub name: &'static str,
    pub family: DeviceFamily,
    pub description: &'static str,
    pub factory: PluginFactory,
}

/// Every plugin the binary knows.
pub const PLUGINS: &[PluginEntry] = &[
    PluginEntry {
        name: passthrough::NAME,
        family: DeviceFamily::Webcam,
        description: "Forward the camera image unchanged",
        factory: passthrough::create,
    },
    PluginEntry {
        name: face_detection::NAME,
        family: DeviceFamily::Webcam,
        description: "Frame the biggest face and print your name above it (--model PATH [--name NAME])",
        factory: face_detection::create,
    },
    PluginEntry {
        name: object_overlay::NAME,
        family: DeviceFamily::Accelerator,
        description: "Draw the accelerator's object detections (--labels FILE). \
                      Needs an AcceleratorLink that produces detections; \
                      the built-in UVC link streams frames only",
        factory: object_overlay::create,
    },
];

/// Plugin used when none is named on the command line.
pub fn default_plugin(family: DeviceFamily) -> &'static str {
    match family {
        DeviceFamily::Webcam => passthrough::NAME,
        DeviceFamily::Accelerator => object_overlay::NAME,
    }
}

/// Look up `name` and check it drives `family`.
pub fn find(name: &str, family: DeviceFamily) -> Result<&'static PluginEntry, ConfigError> {
    let entry = PLUGINS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))?;
    if entry.family != family {
        return Err(ConfigError::FamilyMismatch {
            plugin: name.to_string(),
            plugin_family: entry.family.to_string(),
            requested: family.to_string(),
        });
    }
    Ok(entry)
}

/// Table printed by `--list-plugins`.
pub fn describe() -> String {
    let mut out = String::from("Available plugins:\n");
    for entry in PLUGINS {
        let _ = writeln!(out, "  {:<16} [{}] {}", entry.name, entry.family, entry.description);
    }
    out
}

/// Draw on an RGB frame through an RGBA canvas.
pub(crate) fn annotate(frame: VideoFrame, draw: impl FnOnce(&mut Canvas<'_>)) -> Result<VideoFrame> {
    let mut rgba = frame.convert_to(PixelFormat::Rgba)?;
    {
        let mut canvas = Canvas::new(&mut rgba)?;
        draw(&mut canvas);
    }
    rgba.convert_to(PixelFormat::Rgb)
}
