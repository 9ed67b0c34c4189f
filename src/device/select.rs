use super::{trailing_integer, CorrelationEntry, DeviceFamily, DeviceRecord};
use std::fmt;

/// Outcome of resolving the requested camera against the correlation map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Drive this pair. `report` shows what was picked when nothing was requested.
    Run {
        physical: String,
        virtual_path: String,
        report: Option<Diagnostic>,
    },
    /// Nothing to drive: show the diagnostic and stop.
    Exit(Diagnostic),
}

/// Device tables plus the remediation the user needs to get a working pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub family: DeviceFamily,
    /// Path the user asked for that has no virtual counterpart
    pub unavailable: Option<String>,
    /// Why the correlation step produced nothing
    pub problem: Option<String>,
    pub physical: Vec<DeviceRecord>,
    pub entries: Vec<CorrelationEntry>,
    pub setup: Option<SetupCommands>,
}

impl Diagnostic {
    pub fn new(family: DeviceFamily, physical: &[DeviceRecord], entries: &[CorrelationEntry]) -> Self {
        Self {
            family,
            unavailable: None,
            problem: None,
            physical: physical.to_vec(),
            entries: entries.to_vec(),
            setup: None,
        }
    }

    /// Attach the loopback commands for physical devices without a counterpart.
    pub fn with_setup(mut self, label_prefix: &str) -> Self {
        let unmatched: Vec<DeviceRecord> = self
            .physical
            .iter()
            .filter(|p| !self.entries.iter().any(|e| e.physical.path == p.path))
            .cloned()
            .collect();
        self.setup = setup_commands(self.family, &unmatched, label_prefix);
        self
    }

    pub fn with_problem(mut self, problem: impl Into<String>) -> Self {
        self.problem = Some(problem.into());
        self
    }

    fn virtual_label_for(&self, physical_path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.physical.path == physical_path)
            .map(|e| e.virtual_device.label.as_str())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.unavailable {
            writeln!(f, "Warning! Device not available.")?;
            writeln!(
                f,
                "The specified device '{}' is not available or does not have a virtual counterpart.",
                path
            )?;
            writeln!(f)?;
        }
        if let Some(problem) = &self.problem {
            writeln!(f, "Warning! {}", problem)?;
            writeln!(f)?;
        }

        if self.physical.is_empty() {
            writeln!(f, "No {} devices found.", self.family)?;
        } else {
            let name_width = self.physical.iter().map(|p| p.label.len()).max().unwrap_or(0).max(11);
            let path_width = self.physical.iter().map(|p| p.path.len()).max().unwrap_or(0).max(11);
            writeln!(
                f,
                "{:>nw$} | {:<pw$} | Virtual camera name",
                "Camera name",
                "Camera path",
                nw = name_width,
                pw = path_width
            )?;
            for device in &self.physical {
                writeln!(
                    f,
                    "{:>nw$} | {:<pw$} | {}",
                    device.label,
                    device.path,
                    self.virtual_label_for(&device.path).unwrap_or("-"),
                    nw = name_width,
                    pw = path_width
                )?;
            }
        }

        if !self.entries.is_empty() {
            writeln!(f)?;
            writeln!(f, "Correlated devices:")?;
            for entry in &self.entries {
                writeln!(
                    f,
                    "  {} ({}) -> {} ({})",
                    entry.physical.label, entry.physical.path, entry.virtual_device.label, entry.virtual_device.path
                )?;
            }
            writeln!(f)?;
            writeln!(f, "Run one of them with:")?;
            for entry in &self.entries {
                match self.family {
                    DeviceFamily::Webcam => writeln!(f, "  meetingcam {}", entry.physical.path)?,
                    DeviceFamily::Accelerator => {
                        writeln!(f, "  meetingcam --accelerator {}", entry.physical.path)?
                    }
                }
            }
        }

        if let Some(setup) = &self.setup {
            writeln!(f)?;
            write!(f, "{}", setup)?;
        }
        Ok(())
    }
}

/// `modprobe` invocations creating virtual counterparts for physical devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupCommands {
    /// (physical label, command) for adding a single device
    pub single: Vec<(String, String)>,
    /// One command adding all of them
    pub all: String,
}

impl fmt::Display for SetupCommands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Add a single device with one of the following commands:")?;
        for (label, command) in &self.single {
            writeln!(f)?;
            writeln!(f, "{}:", label)?;
            writeln!(f, "  {}", command)?;
        }
        writeln!(f)?;
        writeln!(f, "Add all devices with the following command:")?;
        writeln!(f, "  {}", self.all)
    }
}

/// Build the loopback commands for `physical`, or `None` if there is nothing to add.
pub fn setup_commands(family: DeviceFamily, physical: &[DeviceRecord], label_prefix: &str) -> Option<SetupCommands> {
    if physical.is_empty() {
        return None;
    }

    let labels: Vec<(String, String)> = physical
        .iter()
        .map(|device| {
            let id = match family {
                DeviceFamily::Webcam => trailing_integer(&device.path)
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| device.path.clone()),
                DeviceFamily::Accelerator => device.path.clone(),
            };
            (device.label.clone(), format!("{}{} {}", label_prefix, id, device.label))
        })
        .collect();

    let single = labels
        .iter()
        .map(|(label, card)| {
            (
                label.clone(),
                format!("sudo modprobe v4l2loopback devices=1 exclusive_caps=1 card_label='{}'", card),
            )
        })
        .collect();

    let cards: Vec<&str> = labels.iter().map(|(_, card)| card.as_str()).collect();
    let caps = vec!["1"; cards.len()].join(",");
    let all = format!(
        "sudo modprobe v4l2loopback devices={} exclusive_caps={} card_label='{}'",
        cards.len(),
        caps,
        cards.join(",")
    );

    Some(SetupCommands { single, all })
}

/// Resolve `requested` (or the first correlated pair) to the devices to drive.
///
/// Pure: the same inputs always give the same selection.
pub fn select(
    requested: Option<&str>,
    family: DeviceFamily,
    physical: &[DeviceRecord],
    entries: &[CorrelationEntry],
    label_prefix: &str,
) -> Selection {
    let diagnostic = Diagnostic::new(family, physical, entries);

    match requested {
        Some(path) => match entries.iter().find(|e| e.physical.path == path) {
            Some(entry) => Selection::Run {
                physical: entry.physical.path.clone(),
                virtual_path: entry.virtual_device.path.clone(),
                report: None,
            },
            None => {
                let mut diagnostic = diagnostic;
                diagnostic.unavailable = Some(path.to_string());
                if entries.is_empty() {
                    diagnostic = diagnostic.with_setup(label_prefix);
                }
                Selection::Exit(diagnostic)
            }
        },
        None => match entries.first() {
            Some(entry) => Selection::Run {
                physical: entry.physical.path.clone(),
                virtual_path: entry.virtual_device.path.clone(),
                report: Some(diagnostic),
            },
            None => Selection::Exit(diagnostic.with_setup(label_prefix)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, label: &str, is_virtual: bool) -> DeviceRecord {
        DeviceRecord {
            path: path.to_string(),
            label: label.to_string(),
            is_virtual,
            numeric_id: None,
            bus_info: String::new(),
        }
    }

    fn entries() -> (Vec<DeviceRecord>, Vec<CorrelationEntry>) {
        let physical = vec![record("/dev/video0", "Cam A", false), record("/dev/video2", "Cam B", false)];
        let entries = vec![
            CorrelationEntry {
                physical: physical[1].clone(),
                virtual_device: record("/dev/video10", "MeetingCam2 Cam B", true),
            },
            CorrelationEntry {
                physical: physical[0].clone(),
                virtual_device: record("/dev/video11", "MeetingCam0 Cam A", true),
            },
        ];
        (physical, entries)
    }

    #[test]
    fn test_requested_device_is_selected() {
        let (physical, entries) = entries();
        let selection = select(Some("/dev/video0"), DeviceFamily::Webcam, &physical, &entries, "MeetingCam");
        assert_eq!(
            selection,
            Selection::Run {
                physical: "/dev/video0".to_string(),
                virtual_path: "/dev/video11".to_string(),
                report: None
            }
        );
    }

    #[test]
    fn test_default_is_first_entry_and_repeatable() {
        let (physical, entries) = entries();
        let first = select(None, DeviceFamily::Webcam, &physical, &entries, "MeetingCam");
        let second = select(None, DeviceFamily::Webcam, &physical, &entries, "MeetingCam");
        assert_eq!(first, second);
        match first {
            Selection::Run {
                physical,
                virtual_path,
                report,
            } => {
                assert_eq!(physical, "/dev/video2");
                assert_eq!(virtual_path, "/dev/video10");
                assert!(report.is_some());
            }
            other => panic!("unexpected selection: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_request_exits_with_tables() {
        let (physical, entries) = entries();
        let Selection::Exit(diagnostic) =
            select(Some("/dev/video7"), DeviceFamily::Webcam, &physical, &entries, "MeetingCam")
        else {
            panic!("expected exit");
        };
        assert_eq!(diagnostic.unavailable.as_deref(), Some("/dev/video7"));
        assert_eq!(diagnostic.entries.len(), 2);
        // Correlations exist, so no setup commands
        assert!(diagnostic.setup.is_none());
        let text = diagnostic.to_string();
        assert!(text.contains("'/dev/video7' is not available"));
        assert!(text.contains("MeetingCam0 Cam A"));
    }

    #[test]
    fn test_no_entries_exits_with_setup_commands() {
        let (physical, _) = entries();
        let Selection::Exit(diagnostic) = select(None, DeviceFamily::Webcam, &physical, &[], "MeetingCam") else {
            panic!("expected exit");
        };
        let setup = diagnostic.setup.expect("setup commands");
        assert_eq!(setup.single.len(), 2);
        assert_eq!(
            setup.single[1].1,
            "sudo modprobe v4l2loopback devices=1 exclusive_caps=1 card_label='MeetingCam2 Cam B'"
        );
        assert_eq!(
            setup.all,
            "sudo modprobe v4l2loopback devices=2 exclusive_caps=1,1 card_label='MeetingCam0 Cam A,MeetingCam2 Cam B'"
        );
    }

    #[test]
    fn test_accelerator_commands_use_serial() {
        let devices = vec![record("14442C1021C694D000", "OAK Device on port 2-3", false)];
        let setup = setup_commands(DeviceFamily::Accelerator, &devices, "MeetingCam").unwrap();
        assert!(setup.all.contains("card_label='MeetingCam14442C1021C694D000 OAK Device on port 2-3'"));
    }

    #[test]
    fn test_no_physical_devices_no_commands() {
        assert!(setup_commands(DeviceFamily::Webcam, &[], "MeetingCam").is_none());
    }
}
