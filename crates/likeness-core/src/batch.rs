//! Batch resolution of source photos against the reference store.
//!
//! Two modes, both running photos on the worker pool:
//! - [`BatchResolver`]: all faces of a photo are queried together and the
//!   photo is assigned the single nearest matching identity.
//! - [`recognize_photos`]: every face is resolved on its own by vote, keeping
//!   its bounding box for annotation.
//!
//! A photo that cannot be analyzed, has no face, or yields signatures of the
//! wrong dimension becomes an [`ItemDiagnostic`]; the batch continues.

use crate::analyzer::{Detection, FaceAnalyzer};
use crate::diagnostic::{DiagnosticKind, ItemDiagnostic};
use crate::matcher::{check_dimension, MatchError, Matcher, Threshold, VoteMatcher};
use crate::pool::{CancelToken, WorkerPool};
use crate::store::SignatureStore;
use crate::types::{BoundingBox, Identity, MatchResult, Signature};
use std::path::{Path, PathBuf};

/// Resolved photos plus diagnostics for the ones that failed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport<T> {
    pub results: Vec<T>,
    pub diagnostics: Vec<ItemDiagnostic>,
    /// True when the caller stopped the batch before every photo ran.
    pub cancelled: bool,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            diagnostics: Vec::new(),
            cancelled: false,
        }
    }
}

/// One photo assigned to a single identity (or unknown).
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMatch {
    pub photo: PathBuf,
    pub result: MatchResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedFace {
    pub bounding_box: BoundingBox,
    pub result: MatchResult,
}

/// Every face of a photo, each resolved independently.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedPhoto {
    pub photo: PathBuf,
    pub faces: Vec<RecognizedFace>,
}

impl From<MatchError> for DiagnosticKind {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::DimensionMismatch { expected, actual } => {
                DiagnosticKind::DimensionMismatch { expected, actual }
            }
        }
    }
}

/// Nearest-distance resolution of a set of query signatures.
///
/// An identity group matches when any query lies within the threshold of
/// any of its reference signatures. Among matching groups the one holding
/// the globally nearest pair wins; equal distances go to the
/// lexicographically smallest label.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResolver {
    threshold: Threshold,
}

impl BatchResolver {
    pub fn new(threshold: Threshold) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Threshold {
        self.threshold
    }

    /// Best single identity for all `queries` taken together.
    ///
    /// An empty query set, an empty store, or no matching group all resolve
    /// to [`MatchResult::Unknown`].
    pub fn resolve_best(
        &self,
        queries: &[Signature],
        store: &SignatureStore,
    ) -> Result<MatchResult, MatchError> {
        for query in queries {
            check_dimension(query, store)?;
        }

        let mut best: Option<(&Identity, f32)> = None;
        for group in store.groups() {
            let matched = group.signatures.iter().any(|reference| {
                queries
                    .iter()
                    .any(|q| q.matches(reference, self.threshold.value()))
            });
            if !matched {
                continue;
            }

            let nearest = group
                .signatures
                .iter()
                .flat_map(|reference| queries.iter().map(move |q| q.distance(reference)))
                .fold(f32::INFINITY, f32::min);

            // Groups arrive in label order; only a strictly nearer group
            // displaces the current best.
            if best.map_or(true, |(_, d)| nearest < d) {
                best = Some((group.identity, nearest));
            }
        }

        Ok(match best {
            Some((identity, distance)) => {
                tracing::debug!(%identity, distance, "batch resolver picked nearest group");
                MatchResult::Known(identity.clone())
            }
            None => MatchResult::Unknown,
        })
    }

    /// Analyze and resolve every photo, one best identity per photo.
    pub fn resolve_photos<A: FaceAnalyzer>(
        &self,
        analyzer: &A,
        store: &SignatureStore,
        photos: &[PathBuf],
        pool: &WorkerPool,
        cancel: &CancelToken,
    ) -> BatchReport<PhotoMatch> {
        warn_if_empty(store);
        run_batch(pool, cancel, photos, |path| {
            let signatures = detect(analyzer, path)?.into_signatures();
            let result = self.resolve_best(&signatures, store)?;
            Ok(PhotoMatch {
                photo: path.to_path_buf(),
                result,
            })
        })
    }
}

/// Resolve every face of every photo by vote.
pub fn recognize_photos<A: FaceAnalyzer>(
    analyzer: &A,
    store: &SignatureStore,
    photos: &[PathBuf],
    threshold: Threshold,
    pool: &WorkerPool,
    cancel: &CancelToken,
) -> BatchReport<RecognizedPhoto> {
    warn_if_empty(store);
    run_batch(pool, cancel, photos, |path| {
        let detection = detect(analyzer, path)?;
        let faces = detection
            .faces()
            .iter()
            .map(|face| {
                Ok(RecognizedFace {
                    bounding_box: face.bounding_box,
                    result: VoteMatcher.resolve(&face.signature, store, threshold)?,
                })
            })
            .collect::<Result<Vec<_>, MatchError>>()?;
        Ok(RecognizedPhoto {
            photo: path.to_path_buf(),
            faces,
        })
    })
}

fn warn_if_empty(store: &SignatureStore) {
    if store.is_empty() {
        tracing::warn!("signature store is empty; every photo will resolve to unknown");
    }
}

fn detect<A: FaceAnalyzer>(analyzer: &A, path: &Path) -> Result<Detection, DiagnosticKind> {
    match analyzer.analyze(path) {
        Ok(Detection::NoneDetected) => Err(DiagnosticKind::NoFaceDetected),
        Ok(detection) => Ok(detection),
        Err(e) => Err(DiagnosticKind::AnalyzerFailed(e.to_string())),
    }
}

fn run_batch<T, F>(pool: &WorkerPool, cancel: &CancelToken, photos: &[PathBuf], f: F) -> BatchReport<T>
where
    T: Send,
    F: Fn(&Path) -> Result<T, DiagnosticKind> + Sync,
{
    tracing::info!(photos = photos.len(), workers = pool.workers(), "resolving photo batch");
    let out = pool.map(photos, cancel, |path| (path.clone(), f(path.as_path())));

    let mut report = BatchReport {
        cancelled: out.cancelled,
        ..BatchReport::default()
    };
    for (path, outcome) in out.results {
        match outcome {
            Ok(item) => report.results.push(item),
            Err(kind) => {
                tracing::warn!(path = %path.display(), reason = %kind, "skipping photo");
                report.diagnostics.push(ItemDiagnostic::new(path, kind));
            }
        }
    }

    tracing::info!(
        resolved = report.results.len(),
        failed = report.diagnostics.len(),
        cancelled = report.cancelled,
        "photo batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::fake::FakeAnalyzer;

    fn id(label: &str) -> Identity {
        Identity::new(label).unwrap()
    }

    fn sig(values: &[f32]) -> Signature {
        Signature::new(values.to_vec())
    }

    fn resolver(t: f32) -> BatchResolver {
        BatchResolver::new(Threshold::new(t).unwrap())
    }

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/wedding/{n}"))).collect()
    }

    #[test]
    fn test_nearest_group_wins_when_both_match() {
        // Ann's nearest reference is 0.3 from the query, Bob's is 0.4.
        let mut store = SignatureStore::new();
        store.append(id("Ann"), sig(&[0.3, 0.0])).unwrap();
        store.append(id("Ann"), sig(&[5.0, 5.0])).unwrap();
        store.append(id("Bob"), sig(&[0.0, 0.4])).unwrap();

        let result = resolver(0.5).resolve_best(&[sig(&[0.0, 0.0])], &store);
        assert_eq!(result, Ok(MatchResult::Known(id("Ann"))));

        // Move Bob closer: now 0.2 away, strictly nearer than Ann.
        let mut store = SignatureStore::new();
        store.append(id("Ann"), sig(&[0.3, 0.0])).unwrap();
        store.append(id("Bob"), sig(&[0.0, 0.2])).unwrap();
        let result = resolver(0.5).resolve_best(&[sig(&[0.0, 0.0])], &store);
        assert_eq!(result, Ok(MatchResult::Known(id("Bob"))));
    }

    #[test]
    fn test_nearest_is_taken_over_all_queries() {
        // Second face in the photo is the one that sits on Cid's reference.
        let mut store = SignatureStore::new();
        store.append(id("Bea"), sig(&[1.0, 0.0])).unwrap();
        store.append(id("Cid"), sig(&[0.0, 1.0])).unwrap();
        let queries = [sig(&[0.9, 0.0]), sig(&[0.0, 1.0])];

        let result = resolver(0.6).resolve_best(&queries, &store);
        assert_eq!(result, Ok(MatchResult::Known(id("Cid"))));
    }

    #[test]
    fn test_equal_distance_goes_to_smallest_label() {
        let mut store = SignatureStore::new();
        store.append(id("Zoe"), sig(&[3.0, 4.0])).unwrap();
        store.append(id("Amy"), sig(&[-3.0, -4.0])).unwrap();

        let result = resolver(5.0).resolve_best(&[sig(&[0.0, 0.0])], &store);
        assert_eq!(result, Ok(MatchResult::Known(id("Amy"))));
    }

    #[test]
    fn test_empty_queries_or_no_match_is_unknown() {
        let mut store = SignatureStore::new();
        store.append(id("Ann"), sig(&[0.0, 0.0])).unwrap();

        assert_eq!(resolver(0.6).resolve_best(&[], &store), Ok(MatchResult::Unknown));
        assert_eq!(
            resolver(0.6).resolve_best(&[sig(&[9.0, 9.0])], &store),
            Ok(MatchResult::Unknown)
        );
        assert_eq!(
            resolver(0.6).resolve_best(&[sig(&[0.0, 0.0])], &SignatureStore::new()),
            Ok(MatchResult::Unknown)
        );
    }

    #[test]
    fn test_resolve_best_dimension_mismatch() {
        let mut store = SignatureStore::new();
        store.append(id("Ann"), sig(&[0.0, 0.0])).unwrap();
        let result = resolver(0.6).resolve_best(&[sig(&[0.0])], &store);
        assert_eq!(
            result,
            Err(MatchError::DimensionMismatch { expected: 2, actual: 1 })
        );
    }

    fn wedding_store() -> SignatureStore {
        let mut store = SignatureStore::new();
        store.append(id("Ann"), sig(&[0.0, 0.0])).unwrap();
        store.append(id("Bob"), sig(&[1.0, 1.0])).unwrap();
        store
    }

    #[test]
    fn test_batch_with_faceless_photos_reports_diagnostics() {
        let analyzer = FakeAnalyzer::new(2)
            .with("p1.jpg", vec![vec![0.0, 0.1]])
            .with("p3.jpg", vec![vec![1.0, 0.9]])
            .with("p5.jpg", vec![vec![7.0, 7.0]]);
        let photos = paths(&["p1.jpg", "p2.jpg", "p3.jpg", "p4.jpg", "p5.jpg"]);

        let report = resolver(0.5).resolve_photos(
            &analyzer,
            &wedding_store(),
            &photos,
            &WorkerPool::new(3),
            &CancelToken::new(),
        );

        assert!(!report.cancelled);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.diagnostics.len(), 2);
        assert_eq!(report.results[0].photo, photos[0]);
        assert_eq!(report.results[0].result, MatchResult::Known(id("Ann")));
        assert_eq!(report.results[1].result, MatchResult::Known(id("Bob")));
        assert_eq!(report.results[2].result, MatchResult::Unknown);
        assert_eq!(
            report.diagnostics,
            vec![
                ItemDiagnostic::new(&photos[1], DiagnosticKind::NoFaceDetected),
                ItemDiagnostic::new(&photos[3], DiagnosticKind::NoFaceDetected),
            ]
        );
    }

    #[test]
    fn test_batch_isolates_analyzer_and_dimension_failures() {
        let analyzer = FakeAnalyzer::new(2)
            .with("ok.jpg", vec![vec![0.0, 0.0]])
            .with("wide.jpg", vec![vec![0.0, 0.0, 0.0]])
            .broken("bad.jpg");
        let photos = paths(&["bad.jpg", "wide.jpg", "ok.jpg"]);

        let report = resolver(0.5).resolve_photos(
            &analyzer,
            &wedding_store(),
            &photos,
            &WorkerPool::new(2),
            &CancelToken::new(),
        );

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].photo, photos[2]);
        assert!(matches!(
            report.diagnostics[0].kind,
            DiagnosticKind::AnalyzerFailed(_)
        ));
        assert_eq!(
            report.diagnostics[1].kind,
            DiagnosticKind::DimensionMismatch { expected: 2, actual: 3 }
        );
    }

    #[test]
    fn test_cancelled_batch_is_flagged() {
        let analyzer = FakeAnalyzer::new(2).with("a.jpg", vec![vec![0.0, 0.0]]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = resolver(0.5).resolve_photos(
            &analyzer,
            &wedding_store(),
            &paths(&["a.jpg"]),
            &WorkerPool::new(1),
            &cancel,
        );
        assert!(report.cancelled);
        assert!(report.results.is_empty());
    }

    #[test]
    fn test_recognize_resolves_each_face() {
        let analyzer = FakeAnalyzer::new(2)
            .with("group.jpg", vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![4.0, 4.0]])
            .with("nobody.jpg", vec![]);
        let photos = paths(&["group.jpg", "nobody.jpg"]);

        let report = recognize_photos(
            &analyzer,
            &wedding_store(),
            &photos,
            Threshold::new(0.5).unwrap(),
            &WorkerPool::new(2),
            &CancelToken::new(),
        );

        assert_eq!(report.results.len(), 1);
        let labels: Vec<&str> = report.results[0]
            .faces
            .iter()
            .map(|f| f.result.label())
            .collect();
        assert_eq!(labels, vec!["Ann", "Bob", "unknown"]);
        assert_eq!(report.results[0].faces[1].bounding_box, BoundingBox::new(0, 20, 10, 10));
        assert_eq!(report.diagnostics[0].kind, DiagnosticKind::NoFaceDetected);
    }
}
