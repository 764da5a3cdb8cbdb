//! likeness-core: reference signatures, matching and photo grouping.
//!
//! Detection and embedding live behind the [`FaceAnalyzer`] trait; this
//! crate only works with the signatures an analyzer hands back.

pub mod analyzer;
pub mod batch;
pub mod diagnostic;
pub mod encoder;
pub mod grouper;
pub mod manifest;
pub mod matcher;
pub mod pool;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzedFace, AnalyzerError, Detection, FaceAnalyzer};
pub use batch::{recognize_photos, BatchReport, BatchResolver, PhotoMatch, RecognizedFace, RecognizedPhoto};
pub use diagnostic::{DiagnosticKind, ItemDiagnostic};
pub use encoder::{EncodeError, EncodeReport, ReferenceEncoder};
pub use grouper::{Grouper, GroupingOptions, PhotoGroup, UnknownPolicy};
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use matcher::{InvalidThreshold, MatchError, Matcher, Threshold, VoteMatcher, DEFAULT_THRESHOLD};
pub use pool::{CancelToken, WorkerPool};
pub use store::{SignatureStore, StoreError, STORE_FORMAT};
pub use types::{BoundingBox, Identity, Located, MatchResult, Signature, UNKNOWN_LABEL};
