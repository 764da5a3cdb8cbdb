//! Explicit reference manifest: which photos show which person.
//!
//! ```toml
//! [[identity]]
//! name = "Ann"
//! references = ["ann/beach.jpg", "ann/portrait.jpg"]
//! ```
//!
//! Relative reference paths resolve against a base directory (the guest
//! photo folder, or the manifest's own directory when none is given).

use crate::types::Identity;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("manifest row {row}: identity name must not be empty")]
    EmptyIdentity { row: usize },
    #[error("manifest row {row}: {name:?} is reserved for unmatched photos")]
    ReservedIdentity { row: usize, name: String },
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default, rename = "identity")]
    identities: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    name: String,
    #[serde(default)]
    references: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub identity: Identity,
    pub references: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Read a manifest file. `base_dir` overrides where relative reference
    /// paths are resolved from.
    pub fn load(path: &Path, base_dir: Option<&Path>) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = base_dir
            .map(Path::to_path_buf)
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        let manifest = Self::parse(&text, &base)?;
        tracing::info!(
            path = %path.display(),
            identities = manifest.entries.len(),
            references = manifest.reference_count(),
            "loaded reference manifest"
        );
        Ok(manifest)
    }

    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(text)?;
        let mut entries = Vec::with_capacity(raw.identities.len());

        for (i, entry) in raw.identities.into_iter().enumerate() {
            let row = i + 1;
            let identity =
                Identity::new(&entry.name).map_err(|_| ManifestError::EmptyIdentity { row })?;
            if identity.is_reserved() {
                return Err(ManifestError::ReservedIdentity {
                    row,
                    name: entry.name,
                });
            }
            if entry.references.is_empty() {
                tracing::warn!(%identity, "manifest lists no reference photos");
            }
            let references = entry
                .references
                .into_iter()
                .map(|r| if r.is_absolute() { r } else { base_dir.join(r) })
                .collect();
            entries.push(ManifestEntry {
                identity,
                references,
            });
        }

        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn reference_count(&self) -> usize {
        self.entries.iter().map(|e| e.references.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolves_relative_paths() {
        let text = r#"
            [[identity]]
            name = "Ann"
            references = ["ann_1.jpg", "/abs/ann_2.jpg"]

            [[identity]]
            name = " Bob "
            references = ["bob.png"]
        "#;
        let manifest = Manifest::parse(text, Path::new("/guests")).unwrap();
        let entries = manifest.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].identity.as_str(), "Ann");
        assert_eq!(
            entries[0].references,
            vec![PathBuf::from("/guests/ann_1.jpg"), PathBuf::from("/abs/ann_2.jpg")]
        );
        assert_eq!(entries[1].identity.as_str(), "Bob");
        assert_eq!(manifest.reference_count(), 3);
    }

    #[test]
    fn test_parse_rejects_empty_name() {
        let text = "[[identity]]\nname = \"\"\nreferences = []\n";
        assert!(matches!(
            Manifest::parse(text, Path::new(".")),
            Err(ManifestError::EmptyIdentity { row: 1 })
        ));
    }

    #[test]
    fn test_parse_rejects_reserved_name() {
        let text = "[[identity]]\nname = \"Ann\"\n\n[[identity]]\nname = \"UNKNOWN\"\n";
        assert!(matches!(
            Manifest::parse(text, Path::new(".")),
            Err(ManifestError::ReservedIdentity { row: 2, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_toml() {
        assert!(matches!(
            Manifest::parse("[[identity]\nname = 1", Path::new(".")),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_manifest() {
        let manifest = Manifest::parse("", Path::new(".")).unwrap();
        assert!(manifest.entries().is_empty());
    }

    #[test]
    fn test_load_defaults_base_to_manifest_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guests.toml");
        std::fs::write(&path, "[[identity]]\nname = \"Ann\"\nreferences = [\"a.jpg\"]\n").unwrap();

        let manifest = Manifest::load(&path, None).unwrap();
        assert_eq!(manifest.entries()[0].references, vec![dir.path().join("a.jpg")]);

        let manifest = Manifest::load(&path, Some(Path::new("/elsewhere"))).unwrap();
        assert_eq!(
            manifest.entries()[0].references,
            vec![PathBuf::from("/elsewhere/a.jpg")]
        );
    }
}
