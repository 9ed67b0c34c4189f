//! Discovery of physical and virtual cameras and their pairing.
//!
//! The flow is strictly enumerate -> correlate -> select, and completes
//! before any capture or output handle is opened.

mod correlate;
mod select;
mod source;

pub use correlate::correlate;
pub use select::{select, setup_commands, Diagnostic, Selection, SetupCommands};
#[cfg(target_os = "linux")]
pub use source::HostDevices;
pub use source::{discover_accelerators, DeviceSource, VideoNode, ACCELERATOR_VENDOR_ID};

use crate::error::{ConfigError, DeviceError};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Device family a plugin and a physical device belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// USB webcams exposed as `/dev/video<n>`
    Webcam,
    /// Camera modules with on-device inference, addressed by serial
    Accelerator,
}

impl DeviceFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Webcam => "webcam",
            DeviceFamily::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webcam" => Ok(DeviceFamily::Webcam),
            "accelerator" => Ok(DeviceFamily::Accelerator),
            other => Err(ConfigError::UnknownFamily(other.to_string())),
        }
    }
}

/// One discoverable camera endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// `/dev/video<n>` for V4L2 nodes, the serial for accelerators
    pub path: String,
    pub label: String,
    pub is_virtual: bool,
    /// First integer in the label of a virtual device
    pub numeric_id: Option<u64>,
    pub bus_info: String,
}

/// A physical device and the virtual device that carries its processed output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub physical: DeviceRecord,
    pub virtual_device: DeviceRecord,
}

/// Classifies V4L2 nodes reported by a [`DeviceSource`].
pub struct DeviceEnumerator<'a> {
    source: &'a dyn DeviceSource,
    loopback_marker: String,
}

impl<'a> DeviceEnumerator<'a> {
    pub fn new(source: &'a dyn DeviceSource, loopback_marker: impl Into<String>) -> Self {
        Self {
            source,
            loopback_marker: loopback_marker.into(),
        }
    }

    /// List physical capture devices (`want_physical`) or loopback output devices.
    pub fn enumerate(&self, want_physical: bool) -> Result<Vec<DeviceRecord>, DeviceError> {
        let mut records = Vec::new();
        for node in self.source.video_nodes()? {
            let is_virtual = node.bus.contains(&self.loopback_marker);
            let wanted = if want_physical {
                !is_virtual && node.capture
            } else {
                is_virtual && node.output
            };
            if !wanted {
                continue;
            }

            if !is_video_node_path(&node.path) {
                return Err(DeviceError::UnexpectedPath(node.path));
            }
            if !self.source.path_exists(&node.path) {
                return Err(DeviceError::MissingPath(node.path));
            }

            debug!(
                "Found {} device {} ({})",
                if is_virtual { "virtual" } else { "physical" },
                node.path,
                node.card
            );
            records.push(DeviceRecord {
                numeric_id: if is_virtual { first_integer(&node.card) } else { None },
                path: node.path,
                label: node.card,
                is_virtual,
                bus_info: node.bus,
            });
        }
        Ok(records)
    }

    /// Physical devices of `family` paired with every loopback output device.
    pub fn discover(&self, family: DeviceFamily) -> Result<(Vec<DeviceRecord>, Vec<DeviceRecord>), DeviceError> {
        let physical = match family {
            DeviceFamily::Webcam => self.enumerate(true)?,
            DeviceFamily::Accelerator => self.source.accelerators()?,
        };
        let virtual_devices = self.enumerate(false)?;
        Ok((physical, virtual_devices))
    }
}

/// Enumerate, correlate and select in one pass. Opens no capture or output handle.
///
/// A correlation failure is not an error here: it becomes a
/// [`Selection::Exit`] whose diagnostic names the problem.
pub fn resolve(
    source: &dyn DeviceSource,
    family: DeviceFamily,
    requested: Option<&str>,
    loopback_marker: &str,
    label_prefix: &str,
) -> Result<Selection, DeviceError> {
    let (physical, virtual_devices) = DeviceEnumerator::new(source, loopback_marker).discover(family)?;
    info!(
        "Found {} physical {} device(s) and {} virtual device(s)",
        physical.len(),
        family,
        virtual_devices.len()
    );

    let entries = match correlate(family, &physical, &virtual_devices) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Device correlation failed: {}", e);
            let diagnostic = Diagnostic::new(family, &physical, &[])
                .with_problem(e.to_string())
                .with_setup(label_prefix);
            return Ok(Selection::Exit(diagnostic));
        }
    };
    for entry in &entries {
        debug!("{} -> {}", entry.physical.path, entry.virtual_device.path);
    }
    Ok(select(requested, family, &physical, &entries, label_prefix))
}

/// Device table with setup commands for every device still lacking a virtual counterpart.
pub fn report(
    source: &dyn DeviceSource,
    family: DeviceFamily,
    loopback_marker: &str,
    label_prefix: &str,
) -> Result<Diagnostic, DeviceError> {
    let (physical, virtual_devices) = DeviceEnumerator::new(source, loopback_marker).discover(family)?;
    let diagnostic = match correlate(family, &physical, &virtual_devices) {
        Ok(entries) => Diagnostic::new(family, &physical, &entries),
        Err(e) => Diagnostic::new(family, &physical, &[]).with_problem(e.to_string()),
    };
    Ok(diagnostic.with_setup(label_prefix))
}

/// `/dev/videoN` with a non-empty run of digits for N.
fn is_video_node_path(path: &str) -> bool {
    path.strip_prefix("/dev/video")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// First run of decimal digits in `text`, e.g. 3 for "MeetingCam3 HD Webcam".
///
/// A run too long for `u64` saturates, so it still reads as an id that
/// matches no device.
pub fn first_integer(text: &str) -> Option<u64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    Some(digits.parse().unwrap_or(u64::MAX))
}

/// Trailing run of decimal digits in `text`, e.g. 3 for "/dev/video3".
pub fn trailing_integer(text: &str) -> Option<u32> {
    let digits = text.len() - text.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    text[text.len() - digits..].parse().ok()
}
