//! Face detection with the ultra-light RFB-320 ONNX model.

use anyhow::{anyhow, Context, Result};
use image::{imageops, ImageBuffer, Rgb};
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;
use tracing::info;

use crate::frame::{PixelFormat, VideoFrame};

const MODEL_WIDTH: u32 = 320;
const MODEL_HEIGHT: u32 = 240;

/// Default score a face needs to be kept.
pub const CONFIDENCE_THRESHOLD: f32 = 0.9;
/// Default overlap above which the smaller-ranked box is suppressed.
pub const OVERLAP_THRESHOLD: f32 = 0.7;

/// A detected face in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Face {
    /// xmin, ymin, xmax, ymax
    pub bbox: [f32; 4],
    pub score: f32,
}

impl Face {
    pub fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }
}

pub struct FaceDetector {
    session: Session,
    confidence_threshold: f32,
    overlap_threshold: f32,
}

impl FaceDetector {
    /// Initialize the ONNX Runtime environment. Call once before loading a model.
    pub fn init() {
        ort::init().with_name("meetingcam").commit();
    }

    pub fn load(model_path: &Path) -> Result<Self> {
        info!("Loading face detection model from {:?}", model_path);
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load model {:?}", model_path))?;

        Ok(Self {
            session,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            overlap_threshold: OVERLAP_THRESHOLD,
        })
    }

    /// Detect faces in an RGB frame.
    pub fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Face>> {
        if frame.format != PixelFormat::Rgb {
            return Err(anyhow!("face detection expects RGB frames, got {:?}", frame.format));
        }
        let image = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, frame.data.as_slice())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        let resized = imageops::resize(&image, MODEL_WIDTH, MODEL_HEIGHT, imageops::FilterType::Triangle);

        let mut input_tensor = Array4::<f32>::zeros((1, 3, MODEL_HEIGHT as usize, MODEL_WIDTH as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input_tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - 127.0) / 128.0;
            }
        }

        let shape = input_tensor.shape().iter().map(|&x| x as i64).collect::<Vec<_>>();
        let input_value = Value::from_array((shape, input_tensor.into_raw_vec()))?;
        let outputs = self.session.run(ort::inputs!["input" => &input_value])?;

        // scores: [1, N, 2] background/face, boxes: [1, N, 4] normalized corners
        let (_, scores) = outputs["scores"].try_extract_tensor::<f32>()?;
        let (_, boxes) = outputs["boxes"].try_extract_tensor::<f32>()?;

        let (w, h) = (frame.width as f32, frame.height as f32);
        let candidates = scores
            .chunks_exact(2)
            .zip(boxes.chunks_exact(4))
            .filter(|(score, _)| score[1] > self.confidence_threshold)
            .map(|(score, b)| Face {
                bbox: [b[0] * w, b[1] * h, b[2] * w, b[3] * h],
                score: score[1],
            })
            .collect();

        Ok(non_max_suppression(candidates, self.overlap_threshold))
    }
}

/// Greedy suppression ordered by the bottom edge of each box.
///
/// The last remaining box is kept and every other box whose intersection
/// covers more than `threshold` of that other box's own area is dropped.
pub fn non_max_suppression(mut faces: Vec<Face>, threshold: f32) -> Vec<Face> {
    faces.sort_by(|a, b| a.bbox[3].total_cmp(&b.bbox[3]));
    let mut kept = Vec::new();
    while let Some(face) = faces.pop() {
        faces.retain(|other| {
            let area = (other.bbox[2] - other.bbox[0] + 1.0) * (other.bbox[3] - other.bbox[1] + 1.0);
            let iw = (face.bbox[2].min(other.bbox[2]) - face.bbox[0].max(other.bbox[0]) + 1.0).max(0.0);
            let ih = (face.bbox[3].min(other.bbox[3]) - face.bbox[1].max(other.bbox[1]) + 1.0).max(0.0);
            area <= 0.0 || iw * ih / area <= threshold
        });
        kept.push(face);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32) -> Face {
        Face {
            bbox: [x1, y1, x2, y2],
            score: 0.95,
        }
    }

    #[test]
    fn test_nms_drops_overlapping_boxes() {
        let faces = vec![face(10.0, 10.0, 100.0, 100.0), face(12.0, 12.0, 102.0, 102.0), face(300.0, 300.0, 340.0, 340.0)];
        let kept = non_max_suppression(faces, OVERLAP_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox, [300.0, 300.0, 340.0, 340.0]);
        assert_eq!(kept[1].bbox, [12.0, 12.0, 102.0, 102.0]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_max_suppression(Vec::new(), OVERLAP_THRESHOLD).is_empty());
    }

    #[test]
    fn test_area() {
        assert_eq!(face(0.0, 0.0, 10.0, 5.0).area(), 50.0);
        assert_eq!(face(10.0, 0.0, 0.0, 5.0).area(), 0.0);
    }
}
