//! End-to-end workflows, independent of any front end.

use crate::annotate::annotate;
use crate::output::{copy_groups, list_images, OutputError};
use likeness_core::{
    recognize_photos, BatchResolver, CancelToken, DiagnosticKind, EncodeError, FaceAnalyzer, Grouper,
    GroupingOptions, ItemDiagnostic, Manifest, ManifestError, ReferenceEncoder, SignatureStore, Threshold, WorkerPool,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("missing required input: {0}")]
    MissingInput(&'static str),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("no usable reference photos: none of the {images} listed images yielded a face")]
    NoReferences { images: usize },
}

#[derive(Debug, Clone, Default)]
pub struct SortOptions {
    pub threshold: Threshold,
    pub grouping: GroupingOptions,
    /// Worker threads, `0` for one per core.
    pub workers: usize,
    pub cancel: CancelToken,
}

/// What a sort run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSummary {
    pub reference_images: usize,
    pub signatures: usize,
    pub photos: usize,
    /// Photos copied per identity.
    pub per_identity: BTreeMap<String, usize>,
    pub unknown: usize,
    pub files_copied: usize,
    /// Reference and event photos that produced nothing.
    pub diagnostics: Vec<ItemDiagnostic>,
    pub cancelled: bool,
}

/// Sort event photos into one folder per guest.
///
/// Reads the manifest (relative reference paths resolve against
/// `guest_dir`), encodes the listed reference photos, assigns each photo in
/// `wedding_dir` to its nearest matching guest, and copies it to
/// `output_dir/<guest>/`.
pub fn start_processing<A: FaceAnalyzer>(
    analyzer: &A,
    manifest_path: &Path,
    guest_dir: &Path,
    wedding_dir: &Path,
    output_dir: &Path,
    options: &SortOptions,
) -> Result<SortSummary, WorkflowError> {
    for (path, what) in [
        (manifest_path, "manifest"),
        (guest_dir, "guest photo folder"),
        (wedding_dir, "event photo folder"),
        (output_dir, "output folder"),
    ] {
        if path.as_os_str().is_empty() {
            return Err(WorkflowError::MissingInput(what));
        }
    }

    let pool = WorkerPool::new(options.workers);
    let manifest = Manifest::load(manifest_path, Some(guest_dir))?;
    let encoded = ReferenceEncoder::new(analyzer)
        .with_pool(pool)
        .encode_manifest(&manifest)?;
    if encoded.store.is_empty() {
        return Err(WorkflowError::NoReferences {
            images: encoded.images,
        });
    }

    let mut summary = SortSummary {
        reference_images: encoded.images,
        signatures: encoded.store.len(),
        diagnostics: encoded.diagnostics,
        ..SortSummary::default()
    };

    let photos = list_images(wedding_dir)?;
    summary.photos = photos.len();
    let report = BatchResolver::new(options.threshold).resolve_photos(
        analyzer,
        &encoded.store,
        &photos,
        &pool,
        &options.cancel,
    );
    summary.cancelled = report.cancelled;

    let groups = Grouper::new(options.grouping).group_report(&report);
    summary.files_copied = copy_groups(&groups, output_dir)?;
    summary.per_identity = groups
        .groups
        .iter()
        .map(|(identity, photos)| (identity.to_string(), photos.len()))
        .collect();
    summary.unknown = groups.unknown.len();
    summary.diagnostics.extend(report.diagnostics);

    tracing::info!(
        photos = summary.photos,
        guests = summary.per_identity.len(),
        copied = summary.files_copied,
        skipped = summary.diagnostics.len(),
        cancelled = summary.cancelled,
        "sorting finished"
    );
    Ok(summary)
}

/// What a recognition run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizeSummary {
    pub annotated: Vec<PathBuf>,
    /// Faces per label across all photos.
    pub faces: BTreeMap<String, usize>,
    pub diagnostics: Vec<ItemDiagnostic>,
    pub cancelled: bool,
}

/// Recognize every face in `photos` against a saved store and write an
/// annotated copy of each photo into `output_dir`.
pub fn recognize_and_annotate<A: FaceAnalyzer>(
    analyzer: &A,
    store: &SignatureStore,
    photos: &[PathBuf],
    output_dir: &Path,
    options: &SortOptions,
) -> Result<RecognizeSummary, WorkflowError> {
    let pool = WorkerPool::new(options.workers);
    let report = recognize_photos(analyzer, store, photos, options.threshold, &pool, &options.cancel);

    let mut summary = RecognizeSummary {
        cancelled: report.cancelled,
        ..RecognizeSummary::default()
    };
    summary.diagnostics = report.diagnostics;
    for photo in &report.results {
        let written = match annotate(&photo.photo, &photo.faces, output_dir) {
            Ok(written) => written,
            Err(err) => {
                tracing::warn!(path = %photo.photo.display(), %err, "could not annotate photo");
                summary
                    .diagnostics
                    .push(ItemDiagnostic::new(&photo.photo, DiagnosticKind::AnalyzerFailed(err.to_string())));
                continue;
            }
        };
        for face in &photo.faces {
            *summary.faces.entry(face.result.label().to_string()).or_default() += 1;
        }
        summary.annotated.push(written.image);
    }

    tracing::info!(
        photos = summary.annotated.len(),
        skipped = summary.diagnostics.len(),
        "recognition finished"
    );
    Ok(summary)
}
