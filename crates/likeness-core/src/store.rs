//! Labeled reference signatures and their on-disk form.
//!
//! The persisted blob is a single JSON document holding two parallel
//! sequences (identities and signatures) plus a format tag, the signature
//! dimension, the producing model and a SHA-256 checksum over the payload.

use crate::types::{Identity, Signature};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Format tag written into every persisted store.
pub const STORE_FORMAT: &str = "likeness-signatures/v1";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("signature has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("signature must be non-empty with finite components")]
    InvalidSignature,
    #[error("corrupt signature store: {0}")]
    Corrupt(String),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Wire layout of a persisted store.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    format: String,
    dimension: usize,
    #[serde(default)]
    model: Option<String>,
    created_at: String,
    checksum: String,
    identities: Vec<String>,
    signatures: Vec<Vec<f32>>,
}

/// All reference signatures belonging to one identity.
#[derive(Debug, Clone)]
pub struct SignatureGroup<'a> {
    pub identity: &'a Identity,
    pub signatures: Vec<&'a Signature>,
}

/// Ordered collection of (identity, signature) pairs.
///
/// Duplicate identities are expected: each extra reference photo adds
/// another vote for that person. All signatures share the dimension of the
/// first one appended. Read-only once loaded for matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureStore {
    entries: Vec<(Identity, Signature)>,
    dimension: Option<usize>,
    model: Option<String>,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store tagged with the embedding model that will fill it.
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    /// Append one pair. No deduplication.
    pub fn append(&mut self, identity: Identity, signature: Signature) -> Result<(), StoreError> {
        self.append_all(identity, vec![signature])
    }

    /// Append several signatures under one identity, all or none.
    pub fn append_all(&mut self, identity: Identity, signatures: Vec<Signature>) -> Result<(), StoreError> {
        let mut dimension = self.dimension;
        for signature in &signatures {
            if signature.dimension() == 0 || signature.values().iter().any(|v| !v.is_finite()) {
                return Err(StoreError::InvalidSignature);
            }
            match dimension {
                Some(expected) if expected != signature.dimension() => {
                    return Err(StoreError::DimensionMismatch {
                        expected,
                        actual: signature.dimension(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(signature.dimension()),
            }
        }
        self.dimension = dimension;
        self.entries
            .extend(signatures.into_iter().map(|signature| (identity.clone(), signature)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimension shared by every signature, `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &Signature)> {
        self.entries.iter().map(|(identity, signature)| (identity, signature))
    }

    /// Distinct identities in first-seen order.
    pub fn identities(&self) -> Vec<&Identity> {
        let mut seen: Vec<&Identity> = Vec::new();
        for (identity, _) in &self.entries {
            if !seen.contains(&identity) {
                seen.push(identity);
            }
        }
        seen
    }

    /// Signatures aggregated per identity, ordered by identity.
    pub fn groups(&self) -> Vec<SignatureGroup<'_>> {
        let mut by_identity: BTreeMap<&Identity, Vec<&Signature>> = BTreeMap::new();
        for (identity, signature) in &self.entries {
            by_identity.entry(identity).or_default().push(signature);
        }
        by_identity
            .into_iter()
            .map(|(identity, signatures)| SignatureGroup { identity, signatures })
            .collect()
    }

    /// Reject a store produced by a different embedder than the active one.
    ///
    /// An empty store is compatible with anything. A model mismatch is only
    /// reported when both sides name a model.
    pub fn ensure_compatible(&self, dimension: usize, model: Option<&str>) -> Result<(), StoreError> {
        if let Some(stored) = self.dimension {
            if stored != dimension {
                return Err(StoreError::Corrupt(format!(
                    "store holds {stored}-dimensional signatures, analyzer produces {dimension}"
                )));
            }
        }
        if let (Some(stored), Some(active)) = (self.model.as_deref(), model) {
            if stored != active {
                return Err(StoreError::Corrupt(format!(
                    "store was built with model {stored}, analyzer uses {active}"
                )));
            }
        }
        Ok(())
    }

    /// Serialize and atomically replace `path` (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let bytes = serde_json::to_vec(&self.to_persisted())
            .map_err(|e| StoreError::Corrupt(format!("serialize: {e}")))?;

        AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
            .write(|f| f.write_all(&bytes))
            .map_err(|err| match err {
                atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => io_err(e),
            })?;

        tracing::info!(
            path = %path.display(),
            entries = self.len(),
            identities = self.identities().len(),
            "saved signature store"
        );
        Ok(())
    }

    /// Load and fully validate a persisted store. Never returns a partial store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let persisted: PersistedStore = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;
        let created_at = persisted.created_at.clone();
        let store = Self::from_persisted(persisted)
            .map_err(|reason| StoreError::Corrupt(format!("{}: {reason}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            entries = store.len(),
            dimension = ?store.dimension,
            model = ?store.model,
            %created_at,
            "loaded signature store"
        );
        Ok(store)
    }

    fn to_persisted(&self) -> PersistedStore {
        let identities: Vec<String> = self
            .entries
            .iter()
            .map(|(identity, _)| identity.as_str().to_string())
            .collect();
        let signatures: Vec<Vec<f32>> = self
            .entries
            .iter()
            .map(|(_, signature)| signature.values().to_vec())
            .collect();
        let dimension = self.dimension.unwrap_or(0);

        PersistedStore {
            format: STORE_FORMAT.to_string(),
            dimension,
            checksum: checksum(dimension, self.model.as_deref(), &identities, &signatures),
            model: self.model.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            identities,
            signatures,
        }
    }

    fn from_persisted(p: PersistedStore) -> Result<Self, String> {
        if p.format != STORE_FORMAT {
            return Err(format!("unsupported format tag {:?} (expected {STORE_FORMAT})", p.format));
        }
        if p.identities.len() != p.signatures.len() {
            return Err(format!(
                "{} identities but {} signatures",
                p.identities.len(),
                p.signatures.len()
            ));
        }
        if let Some((i, sig)) = p
            .signatures
            .iter()
            .enumerate()
            .find(|(_, sig)| sig.len() != p.dimension)
        {
            return Err(format!(
                "entry {i} has {} dimensions, header declares {}",
                sig.len(),
                p.dimension
            ));
        }
        let expected = checksum(p.dimension, p.model.as_deref(), &p.identities, &p.signatures);
        if expected != p.checksum {
            return Err("checksum mismatch".to_string());
        }

        let mut store = Self {
            model: p.model,
            ..Self::default()
        };
        for (i, (label, values)) in p.identities.into_iter().zip(p.signatures).enumerate() {
            let identity = Identity::new(&label).map_err(|e| format!("entry {i}: {e}"))?;
            store
                .append(identity, Signature::new(values))
                .map_err(|e| format!("entry {i}: {e}"))?;
        }
        Ok(store)
    }
}

fn checksum(dimension: usize, model: Option<&str>, identities: &[String], signatures: &[Vec<f32>]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((dimension as u64).to_le_bytes());
    hasher.update(model.unwrap_or("").as_bytes());
    hasher.update([0u8]);
    for (identity, signature) in identities.iter().zip(signatures) {
        hasher.update(identity.as_bytes());
        hasher.update([0u8]);
        for v in signature {
            hasher.update(v.to_le_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
