//! Host device queries: V4L2 nodes and USB accelerators in sysfs.

use super::DeviceRecord;
use crate::error::DeviceError;
use std::fs;
use std::path::Path;
use tracing::debug;

/// USB vendor id of the supported accelerator camera modules.
pub const ACCELERATOR_VENDOR_ID: &str = "03e7";

/// Raw result of querying one V4L2 device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoNode {
    pub path: String,
    /// Card name reported by the driver
    pub card: String,
    /// Bus info reported by the driver
    pub bus: String,
    pub capture: bool,
    pub output: bool,
}

/// Source of device information, implemented by the host and by test fakes.
pub trait DeviceSource {
    /// Every V4L2 node with its capabilities.
    fn video_nodes(&self) -> Result<Vec<VideoNode>, DeviceError>;

    /// Physical accelerator devices, identified by serial.
    fn accelerators(&self) -> Result<Vec<DeviceRecord>, DeviceError>;

    fn path_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }
}

/// The devices of the running host.
#[cfg(target_os = "linux")]
pub struct HostDevices {
    usb_root: std::path::PathBuf,
}

#[cfg(target_os = "linux")]
impl Default for HostDevices {
    fn default() -> Self {
        Self {
            usb_root: std::path::PathBuf::from("/sys/bus/usb/devices"),
        }
    }
}

#[cfg(target_os = "linux")]
impl HostDevices {
    /// Where USB devices are listed in sysfs.
    pub fn usb_root(&self) -> &Path {
        &self.usb_root
    }
}

#[cfg(target_os = "linux")]
impl DeviceSource for HostDevices {
    fn video_nodes(&self) -> Result<Vec<VideoNode>, DeviceError> {
        use v4l::capability::Flags;

        let mut nodes = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_string_lossy().to_string();
            // The handle only lives for this iteration; dropping it closes the fd.
            let device = match v4l::Device::with_path(node.path()) {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", path, e);
                    continue;
                }
            };
            let caps = match device.query_caps() {
                Ok(caps) => caps,
                Err(e) => {
                    tracing::warn!("Skipping {}: failed to query capabilities: {}", path, e);
                    continue;
                }
            };
            debug!("{}: card={:?} bus={:?} driver={:?}", path, caps.card, caps.bus, caps.driver);
            nodes.push(VideoNode {
                path,
                card: caps.card,
                bus: caps.bus,
                capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
                output: caps.capabilities.contains(Flags::VIDEO_OUTPUT),
            });
        }
        nodes.sort_by_key(|n| super::trailing_integer(&n.path).unwrap_or(u32::MAX));
        Ok(nodes)
    }

    fn accelerators(&self) -> Result<Vec<DeviceRecord>, DeviceError> {
        Ok(discover_accelerators(&self.usb_root)?)
    }
}

/// Scan a sysfs USB device directory for accelerator modules.
///
/// Interface entries (names containing ':') are skipped, and so is a device
/// that does not expose a serial number.
pub fn discover_accelerators(usb_root: &Path) -> std::io::Result<Vec<DeviceRecord>> {
    if !usb_root.exists() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<_> = fs::read_dir(usb_root)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.contains(':'))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    let mut records = Vec::new();
    for dir in entries {
        let Some(vendor) = read_attr(&dir, "idVendor") else {
            continue;
        };
        if vendor != ACCELERATOR_VENDOR_ID {
            continue;
        }
        let Some(serial) = read_attr(&dir, "serial") else {
            debug!("Accelerator at {:?} has no serial, skipping", dir);
            continue;
        };
        let port = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        records.push(DeviceRecord {
            label: format!("OAK Device on port {}", port),
            path: serial,
            is_virtual: false,
            numeric_id: None,
            bus_info: format!("usb-{}", port),
        });
    }
    Ok(records)
}

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_sysfs(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("meetingcam-sysfs-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        root
    }

    fn add_usb(root: &Path, port: &str, vendor: &str, serial: Option<&str>) {
        let dir = root.join(port);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("idVendor"), format!("{}\n", vendor)).unwrap();
        if let Some(serial) = serial {
            fs::write(dir.join("serial"), format!("{}\n", serial)).unwrap();
        }
    }

    #[test]
    fn test_discovers_accelerators_by_vendor() {
        let root = fake_sysfs("vendor");
        add_usb(&root, "1-1", "046d", Some("ABCDEF"));
        add_usb(&root, "2-3", ACCELERATOR_VENDOR_ID, Some("14442C1021C694D000"));
        add_usb(&root, "2-4", ACCELERATOR_VENDOR_ID, None);
        fs::create_dir_all(root.join("2-3:1.0")).unwrap();

        let found = discover_accelerators(&root).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "14442C1021C694D000");
        assert_eq!(found[0].label, "OAK Device on port 2-3");
        assert!(!found[0].is_virtual);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_usb_root_yields_nothing() {
        let found = discover_accelerators(Path::new("/nonexistent/meetingcam/usb")).unwrap();
        assert!(found.is_empty());
    }
}
