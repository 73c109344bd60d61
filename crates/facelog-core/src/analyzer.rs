//! Face detection and embedding capability.
//!
//! The pipeline consumes this as a black box: find faces in an image, then
//! turn each face into a fixed-length embedding. [`OnnxAnalyzer`] is the
//! production implementation; tests substitute their own.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Detection, Embedding, FaceBox};
use image::RgbImage;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("analyzer returned {embeddings} embeddings for {faces} faces")]
    Misaligned { faces: usize, embeddings: usize },
    #[error("{0}")]
    Backend(String),
}

/// Detection + embedding capability.
///
/// `encode` must return exactly one embedding per box, in box order.
pub trait FaceAnalyzer: Send + Sync {
    /// Locate faces, in pixel coordinates of `image`.
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceBox>, AnalyzerError>;

    /// Extract one embedding per face box.
    fn encode(&self, image: &RgbImage, faces: &[FaceBox]) -> Result<Vec<Embedding>, AnalyzerError>;

    /// Locate then encode, pairing each box with its embedding.
    fn analyze(&self, image: &RgbImage) -> Result<Vec<Detection>, AnalyzerError> {
        let faces = self.locate(image)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.encode(image, &faces)?;
        if embeddings.len() != faces.len() {
            return Err(AnalyzerError::Misaligned {
                faces: faces.len(),
                embeddings: embeddings.len(),
            });
        }

        Ok(faces
            .into_iter()
            .zip(embeddings)
            .map(|(face, embedding)| Detection { face, embedding })
            .collect())
    }
}

/// SCRFD detection + ArcFace embedding, both on ONNX Runtime.
pub struct OnnxAnalyzer {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNIZER_MODEL_FILE))?;
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceBox>, AnalyzerError> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| AnalyzerError::Backend("detector session lock poisoned".into()))?;
        Ok(detector.detect(image)?)
    }

    fn encode(&self, image: &RgbImage, faces: &[FaceBox]) -> Result<Vec<Embedding>, AnalyzerError> {
        let mut recognizer = self
            .recognizer
            .lock()
            .map_err(|_| AnalyzerError::Backend("recognizer session lock poisoned".into()))?;
        faces
            .iter()
            .map(|face| recognizer.extract(image, face).map_err(AnalyzerError::from))
            .collect()
    }
}
