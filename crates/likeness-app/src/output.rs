//! Writing results to disk: folder listings, grouped copies.

use likeness_core::{PhotoGroup, UNKNOWN_LABEL};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions treated as photos when listing a folder.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp"];

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("label sidecar: {0}")]
    Json(#[from] serde_json::Error),
    #[error("label font: {0}")]
    Font(#[from] ab_glyph::InvalidFont),
}

impl OutputError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
        move |source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Regular image files directly inside `dir`, sorted. Hidden files are skipped.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, OutputError> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(OutputError::io(dir))? {
        let path = entry.map_err(OutputError::io(dir))?.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if !hidden && path.is_file() && is_image(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Copy every grouped photo into `output_dir/<identity>/`, and unknown photos
/// into `output_dir/unknown/`. Returns the number of files written.
///
/// Existing files of the same name are overwritten, so re-running a sort is
/// idempotent.
pub fn copy_groups(groups: &PhotoGroup, output_dir: &Path) -> Result<usize, OutputError> {
    let mut copied = 0;
    for (identity, photos) in &groups.groups {
        copied += copy_into(photos, &output_dir.join(identity.as_str()))?;
    }
    if !groups.unknown.is_empty() {
        copied += copy_into(&groups.unknown, &output_dir.join(UNKNOWN_LABEL))?;
    }
    tracing::info!(output = %output_dir.display(), files = copied, "copied grouped photos");
    Ok(copied)
}

fn copy_into<'a>(
    photos: impl IntoIterator<Item = &'a PathBuf>,
    dir: &Path,
) -> Result<usize, OutputError> {
    std::fs::create_dir_all(dir).map_err(OutputError::io(dir))?;
    let mut copied = 0;
    for photo in photos {
        let Some(name) = photo.file_name() else {
            continue;
        };
        let target = dir.join(name);
        std::fs::copy(photo, &target).map_err(OutputError::io(photo))?;
        tracing::debug!(from = %photo.display(), to = %target.display(), "copied photo");
        copied += 1;
    }
    Ok(copied)
}
