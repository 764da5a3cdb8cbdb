use std::path::PathBuf;
use thiserror::Error;

/// Why one item of a batch produced no result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("signature has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("signature has non-finite components")]
    InvalidSignature,
    #[error("analyzer failed: {0}")]
    AnalyzerFailed(String),
}

/// Per-item diagnostic attached to a batch report instead of aborting it.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDiagnostic {
    pub path: PathBuf,
    pub kind: DiagnosticKind,
}

impl ItemDiagnostic {
    pub fn new(path: impl Into<PathBuf>, kind: DiagnosticKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}
