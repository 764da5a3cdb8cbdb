use crate::detector::{DetectorError, DetectorModel, FaceDetector};
use crate::face::DetectedFace;
use crate::recognizer::{
    FaceRecognizer, RecognizerError, ARCFACE_EMBEDDING_DIM, ARCFACE_MODEL_FILE, ARCFACE_MODEL_VERSION,
};
use image::RgbImage;
use likeness_core::{AnalyzerError, FaceAnalyzer, Signature};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Euclidean distance under which two ArcFace signatures are taken as the
/// same person. Unit vectors, so this equals a cosine similarity of ~0.4.
pub const ARCFACE_DISTANCE_THRESHOLD: f32 = 1.1;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_dir.join("likeness").join("models")
}

/// [`FaceAnalyzer`] backed by SCRFD and ArcFace sessions.
///
/// ONNX sessions need exclusive access to run, so each sits behind a mutex
/// and worker threads take turns on them.
pub struct OnnxFaceAnalyzer {
    detector: Mutex<FaceDetector>,
    recognizer: Mutex<FaceRecognizer>,
}

impl OnnxFaceAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, model: DetectorModel) -> Result<Self, LoadError> {
        let detector = FaceDetector::load(&model_dir.join(model.file_name()))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        tracing::info!(model_dir = %model_dir.display(), detector = %model, "face analyzer ready");
        Ok(Self {
            detector: Mutex::new(detector),
            recognizer: Mutex::new(recognizer),
        })
    }
}

fn poisoned<T>(_: T) -> AnalyzerError {
    AnalyzerError::Detection("inference session lock poisoned".into())
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    type Image = RgbImage;
    type Face = DetectedFace;

    fn open(&self, path: &Path) -> Result<RgbImage, AnalyzerError> {
        image::open(path)
            .map(|img| img.to_rgb8())
            .map_err(|e| AnalyzerError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn detect_faces(&self, image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let mut detector = self.detector.lock().map_err(poisoned)?;
        detector
            .detect(image)
            .map_err(|e| AnalyzerError::Detection(e.to_string()))
    }

    fn embed(&self, image: &RgbImage, faces: &[DetectedFace]) -> Result<Vec<Signature>, AnalyzerError> {
        let mut recognizer = self.recognizer.lock().map_err(poisoned)?;
        faces
            .iter()
            .map(|face| {
                recognizer
                    .extract(image, face)
                    .map(Signature::new)
                    .map_err(|e| AnalyzerError::Embedding(e.to_string()))
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        ARCFACE_EMBEDDING_DIM
    }

    fn model(&self) -> Option<&str> {
        Some(ARCFACE_MODEL_VERSION)
    }
}
