//! Draws object detections computed on the accelerator.

use super::{annotate, Plugin, PluginArgs, Transform};
use crate::capture::{
    Acquired, AcceleratorBinding, AcceleratorDevice, DetectionSet, OutputQueue, Packet, PipelineLayout, StreamKind,
};
use crate::draw::{TextFont, BLUE, WHITE};
use crate::error::{CaptureError, ConfigError};
use crate::frame::VideoFrame;
use crate::hotkey::{FlagSnapshot, PipelineFlag};
use anyhow::{Context, Result};
use std::fs;
use tracing::warn;

pub const NAME: &str = "object-overlay";
pub const LABELS: &str = "labels";
pub const RGB_STREAM: &str = "rgb";
pub const NN_STREAM: &str = "nn";

pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorbike", "aeroplane", "bus", "train", "truck", "boat", "traffic light",
    "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog", "horse", "sheep", "cow",
    "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove", "skateboard", "surfboard",
    "tennis racket", "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "sofa",
    "pottedplant", "bed", "diningtable", "toilet", "tvmonitor", "laptop", "mouse", "remote", "keyboard",
    "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

pub struct ObjectOverlay {
    labels: Vec<String>,
    font: Option<TextFont>,
}

impl ObjectOverlay {
    pub fn new(labels: Vec<String>, font: Option<TextFont>) -> Self {
        Self { labels, font }
    }

    fn label(&self, id: u32) -> String {
        self.labels
            .get(id as usize)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id))
    }
}

impl Transform for ObjectOverlay {
    fn flags(&self) -> Vec<PipelineFlag> {
        vec![PipelineFlag::new("<ctrl>+<alt>+l", LABELS, true, "Print in the detected objects")]
    }

    fn process(&mut self, frame: VideoFrame, detections: Option<&DetectionSet>, flags: &FlagSnapshot) -> Result<VideoFrame> {
        let Some(detections) = detections.filter(|d| !d.detections.is_empty()) else {
            return Ok(frame);
        };
        if !flags.is_on(LABELS) {
            return Ok(frame);
        }

        let (w, h) = (frame.width as f32, frame.height as f32);
        let captions: Vec<(String, String)> = detections
            .detections
            .iter()
            .map(|d| (self.label(d.label), format!("{}%", (d.confidence * 100.0) as u32)))
            .collect();
        let font = self.font.as_ref();
        annotate(frame, |canvas| {
            for (detection, (label, confidence)) in detections.detections.iter().zip(&captions) {
                let [x1, y1, x2, y2] = detection.bbox.map(|v| v.clamp(0.0, 1.0));
                let (x1, y1, x2, y2) = (x1 * w, y1 * h, x2 * w, y2 * h);
                canvas.rect([x1, y1, x2, y2], BLUE, 3.0);
                if let Some(font) = font {
                    canvas.text(font, label, x1 + 10.0, y1 + 50.0, 48.0, WHITE);
                    canvas.text(font, confidence, x1 + 10.0, y1 + 100.0, 24.0, WHITE);
                }
            }
        })
    }
}

/// Pulls the newest frame and, if one is ready, the newest detection batch.
#[derive(Default)]
pub struct ObjectOverlayBinding {
    rgb: Option<OutputQueue>,
    nn: Option<OutputQueue>,
}

impl ObjectOverlayBinding {
    pub fn layout() -> PipelineLayout {
        PipelineLayout::new()
            .stream(RGB_STREAM, StreamKind::Frames)
            .stream(NN_STREAM, StreamKind::Detections)
    }
}

impl AcceleratorBinding for ObjectOverlayBinding {
    fn device_setup(&mut self, device: &mut AcceleratorDevice) -> Result<(), CaptureError> {
        self.rgb = Some(device.output_queue(RGB_STREAM)?);
        self.nn = Some(device.output_queue(NN_STREAM)?);
        Ok(())
    }

    fn acquisition(&mut self, device: &mut AcceleratorDevice) -> Result<Acquired, CaptureError> {
        let (Some(rgb), Some(nn)) = (&self.rgb, &self.nn) else {
            return Err(CaptureError::NotConfigured);
        };
        let frame = device.wait_frame(rgb)?;
        let detections = match nn.try_get()? {
            Some(Packet::Detections(set)) => Some(set),
            _ => None,
        };
        Ok((frame, detections))
    }
}

fn load_labels(path: &str) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).with_context(|| format!("failed to read label file {:?}", path))?;
    let labels: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(ConfigError::InvalidPluginArgument {
            plugin: NAME.to_string(),
            reason: format!("label file {:?} is empty", path),
        }
        .into());
    }
    Ok(labels)
}

pub fn create(args: &PluginArgs) -> Result<Plugin> {
    args.allow_only(NAME, &["labels"])?;
    let labels = match args.get("labels") {
        Some(path) => load_labels(path)?,
        None => COCO_LABELS.iter().map(|l| l.to_string()).collect(),
    };
    let font = match TextFont::system(None) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Detection captions disabled: {:#}", e);
            None
        }
    };
    Ok(Plugin::Accelerator {
        transform: Box::new(ObjectOverlay::new(labels, font)),
        layout: ObjectOverlayBinding::layout(),
        binding: Box::<ObjectOverlayBinding>::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AcceleratorLink, AcceleratorTiming, CaptureSession, Detection, FrameSource, StreamWriter};
    use crate::frame::PixelFormat;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Feed(Arc<Mutex<Vec<StreamWriter>>>);

    impl AcceleratorLink for Feed {
        fn start(&mut self, writers: Vec<StreamWriter>) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = writers;
            Ok(())
        }
        fn stop(&mut self) {
            self.0.lock().unwrap().clear();
        }
    }

    impl Feed {
        fn push(&self, stream: &str, packet: Packet) {
            let writers = self.0.lock().unwrap();
            writers.iter().find(|w| w.name() == stream).unwrap().push(packet);
        }
    }

    fn session(feed: &Feed) -> CaptureSession {
        let timing = AcceleratorTiming {
            frame_timeout: Duration::from_millis(5),
            stall_timeout: Duration::from_millis(50),
        };
        let device = AcceleratorDevice::open(
            "14442C10D13EABCE00",
            &ObjectOverlayBinding::layout(),
            Box::new(feed.clone()),
            (1280, 720),
            timing,
        )
        .unwrap();
        let mut session = CaptureSession::accelerator(device, (1280, 720));
        session.configure(Box::<ObjectOverlayBinding>::default()).unwrap();
        session
    }

    #[test]
    fn test_acquire_without_detections() {
        let feed = Feed::default();
        let mut session = session(&feed);
        feed.push(RGB_STREAM, Packet::Frame(VideoFrame::new(8, 6, PixelFormat::Rgb)));

        let (frame, detections) = session.acquire().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert!(detections.is_none());
    }

    #[test]
    fn test_acquire_with_detections() {
        let feed = Feed::default();
        let mut session = session(&feed);
        let set = DetectionSet {
            detections: vec![Detection {
                label: 0,
                confidence: 0.8,
                bbox: [0.1, 0.1, 0.5, 0.5],
            }],
        };
        feed.push(NN_STREAM, Packet::Detections(set.clone()));
        feed.push(RGB_STREAM, Packet::Frame(VideoFrame::new(8, 6, PixelFormat::Rgb)));

        let (_, detections) = session.acquire().unwrap();
        assert_eq!(detections, Some(set));
    }

    #[test]
    fn test_configure_twice_is_rejected() {
        let feed = Feed::default();
        let mut session = session(&feed);
        assert!(matches!(
            session.configure(Box::<ObjectOverlayBinding>::default()),
            Err(CaptureError::AlreadyConfigured)
        ));
    }

    #[test]
    fn test_unconfigured_session_refuses_to_acquire() {
        let feed = Feed::default();
        let device = AcceleratorDevice::open(
            "X",
            &ObjectOverlayBinding::layout(),
            Box::new(feed),
            (640, 480),
            AcceleratorTiming::default(),
        )
        .unwrap();
        let mut session = CaptureSession::accelerator(device, (1280, 720));
        assert!(matches!(session.acquire(), Err(CaptureError::NotConfigured)));
    }

    #[test]
    fn test_overlay_draws_boxes_when_enabled() {
        let mut overlay = ObjectOverlay::new(vec!["person".into()], None);
        let set = DetectionSet {
            detections: vec![Detection {
                label: 0,
                confidence: 0.9,
                bbox: [0.25, 0.25, 0.75, 0.75],
            }],
        };
        let frame = VideoFrame::new(40, 40, PixelFormat::Rgb);

        let off: FlagSnapshot = [(LABELS.to_string(), false)].into_iter().collect();
        let out = overlay.process(frame.clone(), Some(&set), &off).unwrap();
        assert_eq!(out.data, frame.data);

        let on: FlagSnapshot = [(LABELS.to_string(), true)].into_iter().collect();
        let out = overlay.process(frame.clone(), Some(&set), &on).unwrap();
        assert_ne!(out.data, frame.data);
        assert_eq!((out.width, out.height), (40, 40));
    }

    #[test]
    fn test_unknown_label_id() {
        let overlay = ObjectOverlay::new(COCO_LABELS.iter().map(|l| l.to_string()).collect(), None);
        assert_eq!(overlay.label(0), "person");
        assert_eq!(overlay.label(500), "#500");
    }
}
