//! Frame → faces seam.
//!
//! The recognition loop and the gallery builder only see [`FaceEncoder`].
//! [`OnnxFaceEncoder`] chains the SCRFD detector and the ArcFace recognizer.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_MODEL_VERSION};
use crate::types::ObservedFace;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects every face in a grayscale frame and encodes each one.
pub trait FaceEncoder {
    /// Faces ordered by detector confidence, most confident first. May be empty.
    fn encode(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<ObservedFace>, EncoderError>;

    /// Identifier of the embedding model, stored alongside the gallery.
    fn model_version(&self) -> Option<&str> {
        None
    }
}

pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEncoder {
    pub fn load(detector_model: &Path, recognizer_model: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(detector_model)?;
        let recognizer = FaceRecognizer::load(recognizer_model)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&mut self, frame: &[u8], width: u32, height: u32) -> Result<Vec<ObservedFace>, EncoderError> {
        let detections = self.detector.detect(frame, width, height)?;
        tracing::trace!(faces = detections.len(), "detected faces");

        let mut faces = Vec::with_capacity(detections.len());
        for detection in &detections {
            let embedding = match self.recognizer.embed(frame, width, height, &detection.landmarks) {
                Ok(embedding) => embedding,
                Err(RecognizerError::DegenerateLandmarks) => {
                    tracing::debug!(score = detection.score, "skipping face with degenerate landmarks");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            faces.push(ObservedFace {
                embedding,
                bbox: detection.face_box(width, height),
                confidence: detection.score,
            });
        }
        Ok(faces)
    }

    fn model_version(&self) -> Option<&str> {
        Some(ARCFACE_MODEL_VERSION)
    }
}
