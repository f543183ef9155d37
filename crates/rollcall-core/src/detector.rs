//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes the frame into a 640×640 input, decodes the three stride
//! heads (scores, box distances, five keypoints), and suppresses overlaps.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_SCORE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_IOU: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download it from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer holds {actual} bytes, {width}x{height} needs {expected}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// One detected face in frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
    /// Left eye, right eye, nose, left mouth corner, right mouth corner.
    pub landmarks: [(f32, f32); 5],
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection-over-union with another detection.
    pub fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }

    /// Integer box clamped to a `width`×`height` frame.
    pub fn face_box(&self, width: u32, height: u32) -> FaceBox {
        let clamp_x = |v: f32| v.round().clamp(0.0, width as f32) as i32;
        let clamp_y = |v: f32| v.round().clamp(0.0, height as f32) as i32;
        FaceBox {
            top: clamp_y(self.y1),
            right: clamp_x(self.x2),
            bottom: clamp_y(self.y2),
            left: clamp_x(self.x1),
        }
    }
}

/// Scale and padding used to fit the frame into the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> (Self, u32, u32) {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let letterbox = Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - new_w) / 2,
            pad_y: (SCRFD_INPUT_SIZE - new_h) / 2,
        };
        (letterbox, new_w, new_h)
    }

    /// Model-input coordinates → frame coordinates.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(path = %model_path.display(), outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD needs 9 outputs (score/bbox/kps for 3 strides), model has {}",
                names.len()
            )));
        }

        let outputs = map_outputs(&names);
        tracing::debug!(?outputs, "SCRFD output mapping");

        Ok(Self { session, outputs })
    }

    /// Detect faces in a grayscale frame, most confident first.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = letterbox_input(frame, width, height)?;
        let layout = self.outputs;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let outputs = &outputs;
        let mut candidates = Vec::new();
        for (&stride, slots) in SCRFD_STRIDES.iter().zip(layout.iter()) {
            let extract = move |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(slots.score, "scores")?;
            let boxes = extract(slots.bbox, "boxes")?;
            let kps = extract(slots.kps, "keypoints")?;

            candidates.extend(decode_stride(scores, boxes, kps, stride, &letterbox, SCRFD_SCORE_THRESHOLD));
        }

        Ok(suppress(candidates, SCRFD_NMS_IOU))
    }
}

/// Resize the frame into the letterboxed, normalized NCHW model input.
fn letterbox_input(
    frame: &[u8],
    width: u32,
    height: u32,
) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let expected = width as usize * height as usize;
    let invalid = || DetectorError::InvalidFrame {
        width,
        height,
        expected,
        actual: frame.len(),
    };
    if width == 0 || height == 0 || frame.len() < expected {
        return Err(invalid());
    }

    let image = GrayImage::from_raw(width, height, frame[..expected].to_vec()).ok_or_else(invalid)?;
    let (letterbox, new_w, new_h) = Letterbox::fit(width, height);
    let resized = imageops::resize(&image, new_w, new_h, FilterType::Triangle);

    let size = SCRFD_INPUT_SIZE as usize;
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    // Padding is zero after normalization.
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let value = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
        let (tx, ty) = (x as usize + pad_x, y as usize + pad_y);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = value;
        }
    }

    Ok((tensor, letterbox))
}

/// Locate score/bbox/kps tensors by their `<kind>_<stride>` names, or fall back
/// to the stock export order: scores 0–2, boxes 3–5, keypoints 6–8.
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        names.iter().position(|n| {
            n.split_once('_')
                .is_some_and(|(k, s)| k == kind && s.parse::<usize>().ok() == Some(stride))
        })
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| {
            Some(StrideOutputs {
                score: position("score", stride)?,
                bbox: position("bbox", stride)?,
                kps: position("kps", stride)?,
            })
        })
        .collect();

    match named {
        Some(found) => [found[0], found[1], found[2]],
        None => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional layout");
            std::array::from_fn(|i| StrideOutputs {
                score: i,
                bbox: i + 3,
                kps: i + 6,
            })
        }
    }
}

/// Decode one stride level. Anchor centers sit on the grid corners, two per cell.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE as usize / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|(_, score)| **score > threshold)
        .filter_map(|(idx, &score)| {
            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let k = kps.get(idx * 10..idx * 10 + 10)?;

            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * s;
            let cy = (cell / grid) as f32 * s;

            let (x1, y1) = letterbox.unmap(cx - b[0] * s, cy - b[1] * s);
            let (x2, y2) = letterbox.unmap(cx + b[2] * s, cy + b[3] * s);
            let landmarks = std::array::from_fn(|i| letterbox.unmap(cx + k[i * 2] * s, cy + k[i * 2 + 1] * s));

            Some(Detection { x1, y1, x2, y2, score, landmarks })
        })
        .collect()
}

/// Greedy non-maximum suppression; output is sorted by descending score.
fn suppress(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
