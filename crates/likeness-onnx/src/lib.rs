//! likeness-onnx: face detection and signatures via ONNX Runtime.
//!
//! SCRFD finds faces and their five landmarks, the face is aligned onto the
//! ArcFace template, and ArcFace turns it into a 512-d signature.

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod face;
pub mod recognizer;

pub use analyzer::{default_model_dir, LoadError, OnnxFaceAnalyzer, ARCFACE_DISTANCE_THRESHOLD};
pub use detector::{DetectorModel, UnknownDetectorModel};
pub use face::DetectedFace;
