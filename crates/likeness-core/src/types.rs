use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Label used for photos that resolve to no known identity.
///
/// Reserved: reference identities may not use it, so the unknown bucket can
/// never collide with a real person's folder.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Face signature: the embedding vector produced for one detected face.
///
/// Immutable once constructed. Compared by Euclidean distance; smaller means
/// more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(Vec<f32>);

impl Signature {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Euclidean distance to `other`.
    ///
    /// Callers are responsible for checking that both signatures share a
    /// dimension; extra trailing components are ignored otherwise.
    pub fn distance(&self, other: &Signature) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Whether `other` lies within `threshold` of this signature.
    pub fn matches(&self, other: &Signature, threshold: f32) -> bool {
        self.distance(other) <= threshold
    }
}

impl From<Vec<f32>> for Signature {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("identity label must not be empty")]
pub struct EmptyIdentity;

/// Label naming a known individual.
///
/// Ordered so that tie-breaks between identities are deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Build an identity from a label, trimming surrounding whitespace.
    pub fn new(label: impl AsRef<str>) -> Result<Self, EmptyIdentity> {
        let label = label.as_ref().trim();
        if label.is_empty() {
            return Err(EmptyIdentity);
        }
        Ok(Self(label.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the label collides with [`UNKNOWN_LABEL`] (case-insensitive).
    pub fn is_reserved(&self) -> bool {
        self.0.eq_ignore_ascii_case(UNKNOWN_LABEL)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Location of a detected face in its source image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl BoundingBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Build from a floating point `x, y, width, height` rectangle, rounding
    /// outward so the face is never clipped.
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            top: y.floor() as i32,
            right: (x + width).ceil() as i32,
            bottom: (y + height).ceil() as i32,
            left: x.floor() as i32,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }
}

/// Anything a detector returns that can report where the face is.
pub trait Located {
    fn bounding_box(&self) -> BoundingBox;
}

impl Located for BoundingBox {
    fn bounding_box(&self) -> BoundingBox {
        *self
    }
}

/// Outcome of resolving a query against the reference store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchResult {
    Known(Identity),
    Unknown,
}

impl MatchResult {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            MatchResult::Known(identity) => Some(identity),
            MatchResult::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MatchResult::Known(_))
    }

    /// Display label: the identity, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        match self {
            MatchResult::Known(identity) => identity.as_str(),
            MatchResult::Unknown => UNKNOWN_LABEL,
        }
    }
}
