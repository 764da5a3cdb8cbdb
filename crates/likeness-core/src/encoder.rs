//! Build a signature store from labeled reference photos.

use crate::analyzer::{Detection, FaceAnalyzer};
use crate::diagnostic::{DiagnosticKind, ItemDiagnostic};
use crate::manifest::Manifest;
use crate::pool::{CancelToken, WorkerPool};
use crate::store::{SignatureStore, StoreError};
use crate::types::{Identity, Signature};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("reference root is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:?} is reserved for unmatched photos and cannot name a reference identity")]
    ReservedIdentity(String),
}

/// Store built from the references plus the images that contributed nothing.
#[derive(Debug, Clone)]
pub struct EncodeReport {
    pub store: SignatureStore,
    pub diagnostics: Vec<ItemDiagnostic>,
    /// Reference images examined.
    pub images: usize,
}

/// Turns labeled reference images into a [`SignatureStore`].
///
/// Every face found in a reference image is stored under that image's
/// label. A reference photo that shows several people therefore adds a
/// signature for each of them under the same identity; nothing tries to
/// work out which face is the labeled person. Use single-person reference
/// photos to avoid polluting an identity with bystanders.
pub struct ReferenceEncoder<'a, A> {
    analyzer: &'a A,
    pool: WorkerPool,
}

impl<'a, A: FaceAnalyzer> ReferenceEncoder<'a, A> {
    pub fn new(analyzer: &'a A) -> Self {
        Self {
            analyzer,
            pool: WorkerPool::default(),
        }
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    /// Encode `root/<identity>/<image>` references.
    ///
    /// Only immediate subdirectories name identities and only files directly
    /// inside them are read. Hidden entries are skipped; order is sorted.
    pub fn encode_references(&self, root: &Path) -> Result<EncodeReport, EncodeError> {
        if !root.is_dir() {
            return Err(EncodeError::NotADirectory(root.to_path_buf()));
        }

        let mut jobs = Vec::new();
        for dir in sorted_entries(root)? {
            if !dir.is_dir() {
                tracing::debug!(path = %dir.display(), "ignoring non-directory in reference root");
                continue;
            }
            let name = file_name(&dir);
            let identity = match Identity::new(&name) {
                Ok(identity) => identity,
                Err(_) => continue,
            };
            if identity.is_reserved() {
                return Err(EncodeError::ReservedIdentity(name));
            }
            for image in sorted_entries(&dir)? {
                if image.is_file() {
                    jobs.push((identity.clone(), image));
                }
            }
        }

        self.encode(jobs)
    }

    /// Encode the references listed in an explicit manifest.
    pub fn encode_manifest(&self, manifest: &Manifest) -> Result<EncodeReport, EncodeError> {
        let mut jobs = Vec::with_capacity(manifest.reference_count());
        for entry in manifest.entries() {
            if entry.identity.is_reserved() {
                return Err(EncodeError::ReservedIdentity(entry.identity.to_string()));
            }
            for reference in &entry.references {
                jobs.push((entry.identity.clone(), reference.clone()));
            }
        }
        self.encode(jobs)
    }

    fn encode(&self, jobs: Vec<(Identity, PathBuf)>) -> Result<EncodeReport, EncodeError> {
        let analyzer = self.analyzer;
        let dimension = analyzer.dimension();
        tracing::info!(images = jobs.len(), workers = self.pool.workers(), "encoding reference images");

        let out = self.pool.map(&jobs, &CancelToken::new(), |(_, path)| {
            analyze_reference(analyzer, path, dimension)
        });

        let mut store = match analyzer.model() {
            Some(model) => SignatureStore::with_model(model),
            None => SignatureStore::new(),
        };
        let mut diagnostics = Vec::new();

        for ((identity, path), outcome) in jobs.iter().zip(out.results) {
            let signatures = match outcome {
                Ok(signatures) => signatures,
                Err(kind) => {
                    tracing::warn!(path = %path.display(), %identity, reason = %kind, "skipping reference image");
                    diagnostics.push(ItemDiagnostic::new(path.clone(), kind));
                    continue;
                }
            };
            if signatures.len() > 1 {
                tracing::info!(
                    path = %path.display(),
                    %identity,
                    faces = signatures.len(),
                    "reference image holds several faces; all stored under one identity"
                );
            }
            if let Err(err) = store.append_all(identity.clone(), signatures) {
                let kind = match err {
                    StoreError::DimensionMismatch { expected, actual } => {
                        DiagnosticKind::DimensionMismatch { expected, actual }
                    }
                    StoreError::InvalidSignature => DiagnosticKind::InvalidSignature,
                    other => DiagnosticKind::AnalyzerFailed(other.to_string()),
                };
                tracing::warn!(path = %path.display(), %identity, reason = %kind, "rejected reference image");
                diagnostics.push(ItemDiagnostic::new(path.clone(), kind));
            }
        }

        tracing::info!(
            signatures = store.len(),
            identities = store.identities().len(),
            skipped = diagnostics.len(),
            "reference encoding finished"
        );
        Ok(EncodeReport {
            store,
            diagnostics,
            images: jobs.len(),
        })
    }
}

fn analyze_reference<A: FaceAnalyzer>(
    analyzer: &A,
    path: &Path,
    dimension: usize,
) -> Result<Vec<Signature>, DiagnosticKind> {
    let signatures = match analyzer.analyze(path) {
        Ok(Detection::NoneDetected) => return Err(DiagnosticKind::NoFaceDetected),
        Ok(detection) => detection.into_signatures(),
        Err(e) => return Err(DiagnosticKind::AnalyzerFailed(e.to_string())),
    };
    if let Some(bad) = signatures.iter().find(|s| s.dimension() != dimension) {
        return Err(DiagnosticKind::DimensionMismatch {
            expected: dimension,
            actual: bad.dimension(),
        });
    }
    if signatures.iter().any(|s| s.values().iter().any(|v| !v.is_finite())) {
        return Err(DiagnosticKind::InvalidSignature);
    }
    Ok(signatures)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Non-hidden directory entries, sorted by path.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, EncodeError> {
    let io_err = |source| EncodeError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if !file_name(&path).starts_with('.') {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::fake::FakeAnalyzer;
    use crate::manifest::ManifestEntry;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    fn labels(store: &SignatureStore) -> Vec<String> {
        store.iter().map(|(i, _)| i.to_string()).collect()
    }

    #[test]
    fn test_encode_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Bob/b1.jpg");
        touch(dir.path(), "Ann/a2.jpg");
        touch(dir.path(), "Ann/a1.jpg");
        touch(dir.path(), "Ann/.DS_Store");
        touch(dir.path(), "notes.txt");
        let analyzer = FakeAnalyzer::new(2)
            .with("a1.jpg", vec![vec![0.0, 0.0]])
            .with("a2.jpg", vec![vec![0.1, 0.0]])
            .with("b1.jpg", vec![vec![1.0, 1.0]]);

        let report = ReferenceEncoder::new(&analyzer)
            .with_pool(WorkerPool::new(2))
            .encode_references(dir.path())
            .unwrap();

        assert_eq!(report.images, 3);
        assert!(report.diagnostics.is_empty());
        assert_eq!(labels(&report.store), vec!["Ann", "Ann", "Bob"]);
        assert_eq!(report.store.model(), Some("fake"));
        let first: Vec<&Signature> = report.store.iter().map(|(_, s)| s).collect();
        assert_eq!(first[0].values(), &[0.0, 0.0]);
        assert_eq!(first[1].values(), &[0.1, 0.0]);
    }

    #[test]
    fn test_faceless_reference_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ann/blurry.jpg");
        touch(dir.path(), "Ann/good.jpg");
        let analyzer = FakeAnalyzer::new(2).with("good.jpg", vec![vec![0.0, 1.0]]);

        let report = ReferenceEncoder::new(&analyzer)
            .encode_references(dir.path())
            .unwrap();

        assert_eq!(report.store.len(), 1);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::NoFaceDetected);
        assert!(report.diagnostics[0].path.ends_with("Ann/blurry.jpg"));
    }

    #[test]
    fn test_multi_face_reference_stores_every_face() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ann/wedding_party.jpg");
        let analyzer = FakeAnalyzer::new(2)
            .with("wedding_party.jpg", vec![vec![0.0, 0.0], vec![3.0, 3.0], vec![6.0, 6.0]]);

        let report = ReferenceEncoder::new(&analyzer)
            .encode_references(dir.path())
            .unwrap();

        assert_eq!(labels(&report.store), vec!["Ann", "Ann", "Ann"]);
    }

    #[test]
    fn test_wrong_dimension_reference_is_diagnosed() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ann/odd.jpg");
        let analyzer = FakeAnalyzer::new(2).with("odd.jpg", vec![vec![0.0, 0.0, 0.0]]);

        let report = ReferenceEncoder::new(&analyzer)
            .encode_references(dir.path())
            .unwrap();

        assert!(report.store.is_empty());
        assert_eq!(
            report.diagnostics[0].kind,
            DiagnosticKind::DimensionMismatch { expected: 2, actual: 3 }
        );
    }

    #[test]
    fn test_reference_with_one_bad_face_stores_none_of_its_faces() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "Ann/group.jpg");
        touch(dir.path(), "Ann/solo.jpg");
        let analyzer = FakeAnalyzer::new(2)
            .with("group.jpg", vec![vec![0.0, 0.0], vec![f32::NAN, 1.0]])
            .with("solo.jpg", vec![vec![1.0, 0.0]]);

        let report = ReferenceEncoder::new(&analyzer)
            .encode_references(dir.path())
            .unwrap();

        assert_eq!(report.store.len(), 1);
        assert_eq!(report.store.iter().next().unwrap().1.values(), &[1.0, 0.0]);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::InvalidSignature);
        assert!(report.diagnostics[0].path.ends_with("Ann/group.jpg"));
    }

    #[test]
    fn test_reserved_identity_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "unknown/x.jpg");
        let analyzer = FakeAnalyzer::new(2);
        assert!(matches!(
            ReferenceEncoder::new(&analyzer).encode_references(dir.path()),
            Err(EncodeError::ReservedIdentity(_))
        ));
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "file.jpg");
        let analyzer = FakeAnalyzer::new(2);
        assert!(matches!(
            ReferenceEncoder::new(&analyzer).encode_references(&dir.path().join("file.jpg")),
            Err(EncodeError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_encode_manifest_keeps_manifest_order() {
        let analyzer = FakeAnalyzer::new(1)
            .with("z.jpg", vec![vec![9.0]])
            .with("a.jpg", vec![vec![1.0]])
            .broken("gone.jpg");
        let manifest = Manifest::from_entries(vec![
            ManifestEntry {
                identity: Identity::new("Zed").unwrap(),
                references: vec![PathBuf::from("/g/z.jpg"), PathBuf::from("/g/gone.jpg")],
            },
            ManifestEntry {
                identity: Identity::new("Abe").unwrap(),
                references: vec![PathBuf::from("/g/a.jpg")],
            },
        ]);

        let report = ReferenceEncoder::new(&analyzer)
            .with_pool(WorkerPool::new(3))
            .encode_manifest(&manifest)
            .unwrap();

        assert_eq!(labels(&report.store), vec!["Zed", "Abe"]);
        assert_eq!(report.images, 3);
        assert!(matches!(
            report.diagnostics[0].kind,
            DiagnosticKind::AnalyzerFailed(_)
        ));
    }
}
