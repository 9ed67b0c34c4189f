use meetingcam::config::LOOPBACK_MARKER;
use meetingcam::device::{self, correlate, DeviceEnumerator, DeviceFamily, DeviceRecord, DeviceSource, Selection, VideoNode};
use meetingcam::error::{CorrelationError, DeviceError};

struct Host {
    nodes: Vec<VideoNode>,
    accelerators: Vec<DeviceRecord>,
}

impl Host {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            accelerators: Vec::new(),
        }
    }

    fn camera(mut self, path: &str, card: &str) -> Self {
        self.nodes.push(VideoNode {
            path: path.to_string(),
            card: card.to_string(),
            bus: "usb-0000:00:14.0-2".to_string(),
            capture: true,
            output: false,
        });
        self
    }

    fn loopback(mut self, path: &str, card: &str) -> Self {
        self.nodes.push(VideoNode {
            path: path.to_string(),
            card: card.to_string(),
            bus: format!("{}-{}", LOOPBACK_MARKER, self.nodes.len()),
            capture: false,
            output: true,
        });
        self
    }

    fn accelerator(mut self, serial: &str) -> Self {
        self.accelerators.push(DeviceRecord {
            path: serial.to_string(),
            label: "OAK Device on port 1-2".to_string(),
            is_virtual: false,
            numeric_id: None,
            bus_info: String::new(),
        });
        self
    }
}

impl DeviceSource for Host {
    fn video_nodes(&self) -> Result<Vec<VideoNode>, DeviceError> {
        Ok(self.nodes.clone())
    }

    fn accelerators(&self) -> Result<Vec<DeviceRecord>, DeviceError> {
        Ok(self.accelerators.clone())
    }

    fn path_exists(&self, _: &str) -> bool {
        true
    }
}

fn resolve(host: &Host, family: DeviceFamily, requested: Option<&str>) -> Selection {
    device::resolve(host, family, requested, LOOPBACK_MARKER, "MeetingCam").unwrap()
}

#[test]
fn test_single_webcam_end_to_end() {
    let host = Host::new()
        .camera("/dev/video0", "Test Cam")
        .loopback("/dev/video4", "MeetingCam0 Test Cam");

    match resolve(&host, DeviceFamily::Webcam, None) {
        Selection::Run {
            physical,
            virtual_path,
            report,
        } => {
            assert_eq!(physical, "/dev/video0");
            assert_eq!(virtual_path, "/dev/video4");
            assert!(report.is_some());
        }
        Selection::Exit(d) => panic!("expected a pair, got:\n{}", d),
    }
}

#[test]
fn test_entries_follow_virtual_order() {
    let host = Host::new()
        .camera("/dev/video0", "Cam A")
        .camera("/dev/video1", "Cam B")
        .camera("/dev/video2", "Cam C")
        .loopback("/dev/video10", "MeetingCam2 Cam C")
        .loopback("/dev/video11", "MeetingCam0 Cam A");

    let enumerator = DeviceEnumerator::new(&host, LOOPBACK_MARKER);
    let (physical, virtual_devices) = enumerator.discover(DeviceFamily::Webcam).unwrap();
    assert_eq!(physical.len(), 3);
    assert_eq!(virtual_devices.len(), 2);

    let entries = correlate(DeviceFamily::Webcam, &physical, &virtual_devices).unwrap();
    let pairs: Vec<(&str, &str)> = entries
        .iter()
        .map(|e| (e.virtual_device.path.as_str(), e.physical.path.as_str()))
        .collect();
    assert_eq!(pairs, vec![("/dev/video10", "/dev/video2"), ("/dev/video11", "/dev/video0")]);

    // No request picks the first entry, every time
    for _ in 0..2 {
        match resolve(&host, DeviceFamily::Webcam, None) {
            Selection::Run { physical, .. } => assert_eq!(physical, "/dev/video2"),
            Selection::Exit(d) => panic!("unexpected diagnostic:\n{}", d),
        }
    }
}

#[test]
fn test_stale_virtual_device_is_reported() {
    let host = Host::new()
        .camera("/dev/video0", "Cam A")
        .loopback("/dev/video10", "MeetingCam3 Cam Gone");

    let enumerator = DeviceEnumerator::new(&host, LOOPBACK_MARKER);
    let (physical, virtual_devices) = enumerator.discover(DeviceFamily::Webcam).unwrap();
    assert_eq!(
        correlate(DeviceFamily::Webcam, &physical, &virtual_devices),
        Err(CorrelationError::UnmatchedVirtual {
            label: "MeetingCam3 Cam Gone".to_string(),
            id: 3
        })
    );

    for requested in [None, Some("/dev/video0")] {
        match resolve(&host, DeviceFamily::Webcam, requested) {
            Selection::Exit(diagnostic) => {
                assert!(diagnostic.problem.is_some());
                assert!(diagnostic.setup.is_some(), "no setup commands for {:?}", requested);
                let text = diagnostic.to_string();
                assert!(text.contains("MeetingCam3 Cam Gone"));
                assert!(text.contains("modprobe"));
            }
            Selection::Run { .. } => panic!("a stale virtual device must not be driven"),
        }
    }
}

#[test]
fn test_no_virtual_devices_prints_setup() {
    let host = Host::new().camera("/dev/video0", "Test Cam").camera("/dev/video2", "Other Cam");

    match resolve(&host, DeviceFamily::Webcam, None) {
        Selection::Exit(diagnostic) => {
            let text = diagnostic.to_string();
            assert!(text.contains("card_label='MeetingCam0 Test Cam'"));
            assert!(text.contains("devices=2"));
        }
        Selection::Run { .. } => panic!("nothing to drive"),
    }
}

#[test]
fn test_unknown_requested_device() {
    let host = Host::new()
        .camera("/dev/video0", "Test Cam")
        .loopback("/dev/video4", "MeetingCam0 Test Cam");

    match resolve(&host, DeviceFamily::Webcam, Some("/dev/video7")) {
        Selection::Exit(diagnostic) => {
            assert_eq!(diagnostic.unavailable.as_deref(), Some("/dev/video7"));
            // Correlations exist, so no setup commands are suggested
            assert!(diagnostic.setup.is_none());
        }
        Selection::Run { .. } => panic!("/dev/video7 has no counterpart"),
    }
}

#[test]
fn test_accelerator_by_serial() {
    let host = Host::new()
        .camera("/dev/video0", "Test Cam")
        .loopback("/dev/video4", "MeetingCam0 Test Cam")
        .loopback("/dev/video5", "MeetingCam14442C10D13EABCE00 OAK")
        .accelerator("14442C10D13EABCE00");

    match resolve(&host, DeviceFamily::Accelerator, None) {
        Selection::Run {
            physical,
            virtual_path,
            ..
        } => {
            assert_eq!(physical, "14442C10D13EABCE00");
            assert_eq!(virtual_path, "/dev/video5");
        }
        Selection::Exit(d) => panic!("expected a pair, got:\n{}", d),
    }
}

#[test]
fn test_report_lists_setup_for_unmatched_only() {
    let host = Host::new()
        .camera("/dev/video0", "Test Cam")
        .camera("/dev/video2", "Other Cam")
        .loopback("/dev/video4", "MeetingCam0 Test Cam");

    let report = device::report(&host, DeviceFamily::Webcam, LOOPBACK_MARKER, "MeetingCam").unwrap();
    assert_eq!(report.entries.len(), 1);
    let text = report.to_string();
    assert!(text.contains("card_label='MeetingCam2 Other Cam'"));
    assert!(!text.contains("card_label='MeetingCam0 Test Cam'"));
}
