use super::{trailing_integer, CorrelationEntry, DeviceFamily, DeviceRecord};
use crate::error::CorrelationError;
use std::collections::HashMap;
use tracing::debug;

/// Pair every virtual device with the physical device it was created for.
///
/// Entries follow the order of `virtual_devices`. A physical device is paired
/// with at most one virtual device.
pub fn correlate(
    family: DeviceFamily,
    physical: &[DeviceRecord],
    virtual_devices: &[DeviceRecord],
) -> Result<Vec<CorrelationEntry>, CorrelationError> {
    let mut entries: Vec<CorrelationEntry> = Vec::with_capacity(virtual_devices.len());
    let mut claimed: HashMap<&str, &str> = HashMap::new();

    for virtual_device in virtual_devices {
        let matched = match family {
            DeviceFamily::Webcam => Some(match_by_id(physical, virtual_device)?),
            DeviceFamily::Accelerator => physical
                .iter()
                .find(|p| virtual_device.label.contains(p.path.as_str())),
        };
        let Some(matched) = matched else {
            debug!("Virtual device {} has no accelerator counterpart", virtual_device.path);
            continue;
        };

        if let Some(first) = claimed.insert(matched.path.as_str(), virtual_device.label.as_str()) {
            return Err(CorrelationError::DuplicateVirtual {
                physical: matched.path.clone(),
                first: first.to_string(),
                second: virtual_device.label.clone(),
            });
        }
        debug!("Correlated {} -> {}", matched.path, virtual_device.path);
        entries.push(CorrelationEntry {
            physical: matched.clone(),
            virtual_device: virtual_device.clone(),
        });
    }

    Ok(entries)
}

fn match_by_id<'a>(
    physical: &'a [DeviceRecord],
    virtual_device: &DeviceRecord,
) -> Result<&'a DeviceRecord, CorrelationError> {
    let id = virtual_device
        .numeric_id
        .ok_or_else(|| CorrelationError::MissingVirtualId(virtual_device.label.clone()))?;
    physical
        .iter()
        .find(|p| trailing_integer(&p.path).map(u64::from) == Some(id))
        .ok_or_else(|| CorrelationError::UnmatchedVirtual {
            label: virtual_device.label.clone(),
            id,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::first_integer;

    fn physical(path: &str, label: &str) -> DeviceRecord {
        DeviceRecord {
            path: path.to_string(),
            label: label.to_string(),
            is_virtual: false,
            numeric_id: None,
            bus_info: "usb-1".to_string(),
        }
    }

    fn virtual_device(path: &str, label: &str) -> DeviceRecord {
        DeviceRecord {
            path: path.to_string(),
            label: label.to_string(),
            is_virtual: true,
            numeric_id: first_integer(label),
            bus_info: "platform:v4l2loopback-000".to_string(),
        }
    }

    #[test]
    fn test_webcam_entries_follow_virtual_order() {
        let cams = vec![
            physical("/dev/video0", "Cam A"),
            physical("/dev/video1", "Cam B"),
            physical("/dev/video2", "Cam C"),
        ];
        let virtuals = vec![
            virtual_device("/dev/video10", "MeetingCam2 Cam C"),
            virtual_device("/dev/video11", "MeetingCam0 Cam A"),
        ];

        let entries = correlate(DeviceFamily::Webcam, &cams, &virtuals).unwrap();
        let pairs: Vec<_> = entries
            .iter()
            .map(|e| (e.virtual_device.path.as_str(), e.physical.path.as_str()))
            .collect();
        assert_eq!(pairs, vec![("/dev/video10", "/dev/video2"), ("/dev/video11", "/dev/video0")]);
    }

    #[test]
    fn test_unmatched_virtual_id_is_reported() {
        let cams = vec![physical("/dev/video0", "Cam A")];
        let virtuals = vec![
            virtual_device("/dev/video10", "MeetingCam0 Cam A"),
            virtual_device("/dev/video11", "MeetingCam4 Cam Gone"),
        ];

        assert_eq!(
            correlate(DeviceFamily::Webcam, &cams, &virtuals),
            Err(CorrelationError::UnmatchedVirtual {
                label: "MeetingCam4 Cam Gone".to_string(),
                id: 4
            })
        );
    }

    #[test]
    fn test_oversized_virtual_id_is_unmatched() {
        let cams = vec![physical("/dev/video0", "Cam A")];
        let virtuals = vec![virtual_device("/dev/video10", "MeetingCam14442102169400000 Cam")];

        assert!(matches!(
            correlate(DeviceFamily::Webcam, &cams, &virtuals),
            Err(CorrelationError::UnmatchedVirtual { .. })
        ));
    }

    #[test]
    fn test_virtual_label_without_id_is_reported() {
        let cams = vec![physical("/dev/video0", "Cam A")];
        let virtuals = vec![virtual_device("/dev/video10", "Dummy video device")];
        assert!(matches!(
            correlate(DeviceFamily::Webcam, &cams, &virtuals),
            Err(CorrelationError::MissingVirtualId(_))
        ));
    }

    #[test]
    fn test_two_virtuals_for_one_camera_are_rejected() {
        let cams = vec![physical("/dev/video0", "Cam A")];
        let virtuals = vec![
            virtual_device("/dev/video10", "MeetingCam0 Cam A"),
            virtual_device("/dev/video11", "MeetingCam0 again"),
        ];
        assert!(matches!(
            correlate(DeviceFamily::Webcam, &cams, &virtuals),
            Err(CorrelationError::DuplicateVirtual { .. })
        ));
    }

    #[test]
    fn test_accelerator_matches_serial_inside_label() {
        let devices = vec![
            physical("14442C1021C694D000", "OAK Device on port 2-3"),
            physical("18443010B1D2F50F00", "OAK Device on port 2-4"),
        ];
        let virtuals = vec![
            virtual_device("/dev/video10", "MeetingCam18443010B1D2F50F00 OAK Device on port 2-4"),
            virtual_device("/dev/video11", "Some other loopback"),
        ];

        let entries = correlate(DeviceFamily::Accelerator, &devices, &virtuals).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].physical.path, "18443010B1D2F50F00");
        assert_eq!(entries[0].virtual_device.path, "/dev/video10");
    }

    #[test]
    fn test_no_virtuals_means_no_entries() {
        let cams = vec![physical("/dev/video0", "Cam A")];
        assert!(correlate(DeviceFamily::Webcam, &cams, &[]).unwrap().is_empty());
    }
}
