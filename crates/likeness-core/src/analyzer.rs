//! Contract with the face detection / embedding collaborator.
//!
//! The core never decodes images itself. It hands a path to an analyzer,
//! which opens the image, finds faces and produces one signature per face.

use crate::types::{BoundingBox, Located, Signature};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("cannot open image {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("embedder returned {signatures} signatures for {faces} faces")]
    CountMismatch { faces: usize, signatures: usize },
}

/// One face found in an image together with its signature.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedFace {
    pub bounding_box: BoundingBox,
    pub signature: Signature,
}

/// Result of analyzing one image. Callers branch on data: an image without
/// faces is an ordinary outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Detected(Vec<AnalyzedFace>),
    NoneDetected,
}

impl Detection {
    pub fn faces(&self) -> &[AnalyzedFace] {
        match self {
            Detection::Detected(faces) => faces,
            Detection::NoneDetected => &[],
        }
    }

    pub fn into_signatures(self) -> Vec<Signature> {
        match self {
            Detection::Detected(faces) => faces.into_iter().map(|f| f.signature).collect(),
            Detection::NoneDetected => Vec::new(),
        }
    }
}

/// Face detector plus embedder.
///
/// Shared across worker threads, hence `Sync`; implementations holding
/// mutable inference sessions guard them internally.
pub trait FaceAnalyzer: Send + Sync {
    /// Decoded image handed from `open` to the detection and embedding steps.
    type Image;
    /// Detector output; carries whatever the embedder needs beyond the box
    /// (landmarks, for instance).
    type Face: Located;

    fn open(&self, path: &Path) -> Result<Self::Image, AnalyzerError>;

    fn detect_faces(&self, image: &Self::Image) -> Result<Vec<Self::Face>, AnalyzerError>;

    /// One signature per face, in the same order as `faces`.
    fn embed(&self, image: &Self::Image, faces: &[Self::Face]) -> Result<Vec<Signature>, AnalyzerError>;

    /// Length of every signature this analyzer produces.
    fn dimension(&self) -> usize;

    /// Identifier of the embedding model, recorded in stores it fills.
    fn model(&self) -> Option<&str> {
        None
    }

    /// Open, detect and embed in one step.
    fn analyze(&self, path: &Path) -> Result<Detection, AnalyzerError> {
        let image = self.open(path)?;
        let faces = self.detect_faces(&image)?;
        if faces.is_empty() {
            return Ok(Detection::NoneDetected);
        }

        let signatures = self.embed(&image, &faces)?;
        if signatures.len() != faces.len() {
            return Err(AnalyzerError::CountMismatch {
                faces: faces.len(),
                signatures: signatures.len(),
            });
        }

        Ok(Detection::Detected(
            faces
                .iter()
                .zip(signatures)
                .map(|(face, signature)| AnalyzedFace {
                    bounding_box: face.bounding_box(),
                    signature,
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Canned analyzer for tests: maps file names to face signatures.

    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeAnalyzer {
        faces: HashMap<String, Vec<Vec<f32>>>,
        broken: Vec<String>,
        pub dimension: usize,
        pub drop_one_signature: bool,
    }

    impl FakeAnalyzer {
        pub fn new(dimension: usize) -> Self {
            Self {
                dimension,
                ..Self::default()
            }
        }

        /// Register the faces found in the image whose file name is `name`.
        pub fn with(mut self, name: &str, faces: Vec<Vec<f32>>) -> Self {
            self.faces.insert(name.to_string(), faces);
            self
        }

        /// Make opening `name` fail.
        pub fn broken(mut self, name: &str) -> Self {
            self.broken.push(name.to_string());
            self
        }
    }

    impl FaceAnalyzer for FakeAnalyzer {
        type Image = String;
        type Face = BoundingBox;

        fn open(&self, path: &Path) -> Result<String, AnalyzerError> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.broken.contains(&name) {
                return Err(AnalyzerError::Open {
                    path: path.display().to_string(),
                    reason: "unreadable".into(),
                });
            }
            Ok(name)
        }

        fn detect_faces(&self, image: &String) -> Result<Vec<BoundingBox>, AnalyzerError> {
            let count = self.faces.get(image).map_or(0, Vec::len);
            Ok((0..count as i32)
                .map(|i| BoundingBox::new(0, i * 10 + 10, 10, i * 10))
                .collect())
        }

        fn embed(&self, image: &String, faces: &[BoundingBox]) -> Result<Vec<Signature>, AnalyzerError> {
            let mut signatures: Vec<Signature> = self
                .faces
                .get(image)
                .map(|v| v.iter().cloned().map(Signature::new).collect())
                .unwrap_or_default();
            signatures.truncate(faces.len());
            if self.drop_one_signature {
                signatures.pop();
            }
            Ok(signatures)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model(&self) -> Option<&str> {
            Some("fake")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeAnalyzer;
    use super::*;

    #[test]
    fn test_analyze_pairs_boxes_with_signatures() {
        let analyzer = FakeAnalyzer::new(2).with("two.jpg", vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let detection = analyzer.analyze(Path::new("/photos/two.jpg")).unwrap();
        let faces = detection.faces();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].bounding_box, BoundingBox::new(0, 10, 10, 0));
        assert_eq!(faces[1].signature.values(), &[0.0, 1.0]);
    }

    #[test]
    fn test_analyze_without_faces_is_none_detected() {
        let analyzer = FakeAnalyzer::new(2);
        let detection = analyzer.analyze(Path::new("empty.jpg")).unwrap();
        assert_eq!(detection, Detection::NoneDetected);
        assert!(detection.into_signatures().is_empty());
    }

    #[test]
    fn test_analyze_rejects_short_embedding() {
        let mut analyzer = FakeAnalyzer::new(2).with("a.jpg", vec![vec![1.0, 0.0]]);
        analyzer.drop_one_signature = true;
        let err = analyzer.analyze(Path::new("a.jpg")).unwrap_err();
        assert!(matches!(err, AnalyzerError::CountMismatch { faces: 1, signatures: 0 }));
    }

    #[test]
    fn test_open_failure_propagates() {
        let analyzer = FakeAnalyzer::new(2).broken("bad.jpg");
        assert!(matches!(
            analyzer.analyze(Path::new("bad.jpg")),
            Err(AnalyzerError::Open { .. })
        ));
    }
}
