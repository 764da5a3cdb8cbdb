//! Single-query identity resolution by majority vote.

use crate::store::SignatureStore;
use crate::types::{Identity, MatchResult, Signature};
use std::collections::BTreeMap;
use thiserror::Error;

/// Default maximum Euclidean distance for two signatures to count as the
/// same person. Empirical; tuned for 128-d dlib-style embeddings.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("threshold must be a finite, non-negative distance, got {0}")]
pub struct InvalidThreshold(pub f32);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Maximum distance at which a reference signature matches a query.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub fn new(value: f32) -> Result<Self, InvalidThreshold> {
        if value.is_finite() && value >= 0.0 {
            Ok(Self(value))
        } else {
            Err(InvalidThreshold(value))
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

/// Strategy for resolving one query signature against the reference store.
pub trait Matcher {
    fn resolve(
        &self,
        query: &Signature,
        store: &SignatureStore,
        threshold: Threshold,
    ) -> Result<MatchResult, MatchError>;
}

/// Reject a query whose length disagrees with the store.
pub(crate) fn check_dimension(query: &Signature, store: &SignatureStore) -> Result<(), MatchError> {
    match store.dimension() {
        Some(expected) if expected != query.dimension() => Err(MatchError::DimensionMismatch {
            expected,
            actual: query.dimension(),
        }),
        _ => Ok(()),
    }
}

/// Majority vote over every stored reference within the threshold.
///
/// Each matching entry is one vote for its identity, so people with more
/// reference photos weigh more. The identity with the most votes wins. When
/// several identities share the top count, the lexicographically smallest
/// label wins, independent of store order.
pub struct VoteMatcher;

impl VoteMatcher {
    /// Per-entry match flags, in store order.
    pub fn matches(
        &self,
        query: &Signature,
        store: &SignatureStore,
        threshold: Threshold,
    ) -> Result<Vec<bool>, MatchError> {
        check_dimension(query, store)?;
        Ok(store
            .iter()
            .map(|(_, reference)| query.matches(reference, threshold.value()))
            .collect())
    }

    /// Votes per identity; identities without a vote are absent.
    pub fn tally<'s>(
        &self,
        query: &Signature,
        store: &'s SignatureStore,
        threshold: Threshold,
    ) -> Result<BTreeMap<&'s Identity, usize>, MatchError> {
        let flags = self.matches(query, store, threshold)?;
        let mut votes: BTreeMap<&Identity, usize> = BTreeMap::new();
        for ((identity, _), matched) in store.iter().zip(flags) {
            if matched {
                *votes.entry(identity).or_default() += 1;
            }
        }
        Ok(votes)
    }
}

impl Matcher for VoteMatcher {
    fn resolve(
        &self,
        query: &Signature,
        store: &SignatureStore,
        threshold: Threshold,
    ) -> Result<MatchResult, MatchError> {
        let votes = self.tally(query, store, threshold)?;

        // BTreeMap iterates in label order; strict `>` keeps the first
        // (smallest) label among equal counts.
        let mut winner: Option<(&Identity, usize)> = None;
        for (identity, count) in votes {
            if winner.map_or(true, |(_, best)| count > best) {
                winner = Some((identity, count));
            }
        }

        Ok(match winner {
            Some((identity, count)) => {
                tracing::debug!(%identity, votes = count, "vote matcher resolved query");
                MatchResult::Known(identity.clone())
            }
            None => MatchResult::Unknown,
        })
    }
}
