//! Frames the face closest to the camera and writes the user's name above it.

use super::{annotate, Plugin, PluginArgs, Transform};
use crate::capture::DetectionSet;
use crate::draw::{TextFont, GREEN};
use crate::error::ConfigError;
use crate::frame::VideoFrame;
use crate::hotkey::{FlagSnapshot, PipelineFlag};
use crate::ml::{Face, FaceDetector};
use anyhow::Result;
use std::path::Path;
use tracing::{info, warn};

pub const NAME: &str = "face-detection";
pub const FACE_BOX: &str = "face_box";
pub const NAME_LABEL: &str = "name_label";
const DEFAULT_USER_NAME: &str = "Code Ninja";

// Sizes relative to the frame height
const THICKNESS_SCALE: f32 = 6e-3;
const TEXT_SCALE: f32 = 6.5e-2;
const TEXT_OFFSET_SCALE: f32 = 3e-2;

pub struct FaceDetection {
    detector: FaceDetector,
    font: Option<TextFont>,
    user_name: String,
}

impl FaceDetection {
    pub fn new(detector: FaceDetector, font: Option<TextFont>, user_name: String) -> Self {
        Self {
            detector,
            font,
            user_name,
        }
    }
}

/// The biggest box belongs to whoever sits closest to the camera.
fn closest_face(faces: &[Face]) -> Option<Face> {
    faces.iter().copied().max_by(|a, b| a.area().total_cmp(&b.area()))
}

impl Transform for FaceDetection {
    fn flags(&self) -> Vec<PipelineFlag> {
        vec![
            PipelineFlag::new("<ctrl>+<alt>+f", FACE_BOX, true, "Frame the detected face"),
            PipelineFlag::new("<ctrl>+<alt>+n", NAME_LABEL, true, "Print your name above the face"),
        ]
    }

    fn process(&mut self, frame: VideoFrame, _: Option<&DetectionSet>, flags: &FlagSnapshot) -> Result<VideoFrame> {
        let draw_box = flags.is_on(FACE_BOX);
        let draw_name = flags.is_on(NAME_LABEL) && self.font.is_some() && !self.user_name.is_empty();
        if !draw_box && !draw_name {
            return Ok(frame);
        }

        let Some(face) = closest_face(&self.detector.detect(&frame)?) else {
            return Ok(frame);
        };

        let (w, h) = (frame.width as f32, frame.height as f32);
        let thickness = (h * THICKNESS_SCALE).ceil();
        let font = self.font.as_ref();
        let user_name = self.user_name.as_str();
        annotate(frame, |canvas| {
            if draw_box {
                canvas.corner_box(face.bbox, GREEN, thickness, thickness * 4.0, thickness * 8.0);
            }
            if let (true, Some(font)) = (draw_name, font) {
                let [x1, y1, _, _] = face.bbox;
                let size = h * TEXT_SCALE;
                // Keep long names inside the frame
                let x = x1.min(w - font.measure(user_name, size)).max(0.0);
                canvas.text(font, user_name, x, y1 - h * TEXT_OFFSET_SCALE, size, GREEN);
            }
        })
    }
}

pub fn create(args: &PluginArgs) -> Result<Plugin> {
    args.allow_only(NAME, &["model", "name"])?;
    let model = Path::new(args.require(NAME, "model")?);
    if !model.is_file() {
        return Err(ConfigError::InvalidPluginArgument {
            plugin: NAME.to_string(),
            reason: format!(
                "model file {:?} not found, download ultra-lightweight-face-detection-rfb-320 as ONNX",
                model
            ),
        }
        .into());
    }

    let user_name = match args.get("name") {
        Some(name) => name.to_string(),
        None => {
            info!("No '--name' given, calling you {}", DEFAULT_USER_NAME);
            DEFAULT_USER_NAME.to_string()
        }
    };

    let font = match TextFont::system(None) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Name label disabled: {:#}", e);
            None
        }
    };

    FaceDetector::init();
    let detector = FaceDetector::load(model)?;
    Ok(Plugin::Simple(Box::new(FaceDetection::new(detector, font, user_name))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> PluginArgs {
        PluginArgs::parse(&list.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_missing_model_is_config_error() {
        let err = create(&args(&["--name", "Ada"])).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingPluginArgument { .. })
        ));

        let err = create(&args(&["--model", "/nonexistent/rfb-320.onnx"])).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidPluginArgument { .. })
        ));
    }

    #[test]
    fn test_closest_face_is_biggest() {
        let faces = [
            Face {
                bbox: [0.0, 0.0, 10.0, 10.0],
                score: 0.99,
            },
            Face {
                bbox: [50.0, 50.0, 150.0, 170.0],
                score: 0.91,
            },
        ];
        assert_eq!(closest_face(&faces).unwrap().bbox, [50.0, 50.0, 150.0, 170.0]);
        assert!(closest_face(&[]).is_none());
    }
}
