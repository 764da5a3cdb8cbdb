//! Partition resolved photos into per-identity sets.
//!
//! Pure bookkeeping: nothing here touches the filesystem. Copying the
//! groups out is the caller's job.

use crate::batch::{BatchReport, PhotoMatch, RecognizedPhoto};
use crate::types::{Identity, MatchResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// What happens to photos that resolve to no known identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownPolicy {
    /// Leave them out of the output.
    #[default]
    Drop,
    /// Keep them in a dedicated unknown group.
    Collect,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupingOptions {
    pub unknown: UnknownPolicy,
    /// Treat photos that failed analysis as unknown instead of omitting them.
    /// Only meaningful together with [`UnknownPolicy::Collect`].
    pub failed_as_unknown: bool,
}

/// Photos per identity, plus the unknown bucket when collected.
///
/// Sets are ordered so that output is stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoGroup {
    pub groups: BTreeMap<Identity, BTreeSet<PathBuf>>,
    pub unknown: BTreeSet<PathBuf>,
}

impl PhotoGroup {
    pub fn photos_of(&self, identity: &Identity) -> Option<&BTreeSet<PathBuf>> {
        self.groups.get(identity)
    }

    /// Photo count across every group, a photo in two groups counted twice.
    pub fn placements(&self) -> usize {
        self.groups.values().map(BTreeSet::len).sum::<usize>() + self.unknown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.unknown.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Grouper {
    options: GroupingOptions,
}

impl Grouper {
    pub fn new(options: GroupingOptions) -> Self {
        Self { options }
    }

    /// Group `(photo, result)` pairs.
    pub fn group<I>(&self, resolved: I) -> PhotoGroup
    where
        I: IntoIterator<Item = (PathBuf, MatchResult)>,
    {
        let mut out = PhotoGroup::default();
        for (photo, result) in resolved {
            self.place(&mut out, photo, result);
        }
        out
    }

    /// Group a best-identity batch, honoring `failed_as_unknown`.
    pub fn group_report(&self, report: &BatchReport<PhotoMatch>) -> PhotoGroup {
        let mut out = self.group(
            report
                .results
                .iter()
                .map(|m| (m.photo.clone(), m.result.clone())),
        );
        self.place_failed(&mut out, report);
        out
    }

    /// Group a per-face batch. A photo joins the group of every identity
    /// recognized in it, and counts as unknown only when no face matched.
    pub fn group_recognized(&self, report: &BatchReport<RecognizedPhoto>) -> PhotoGroup {
        let mut out = PhotoGroup::default();
        for photo in &report.results {
            let mut known = photo
                .faces
                .iter()
                .filter_map(|f| f.result.identity())
                .peekable();
            if known.peek().is_none() {
                self.place(&mut out, photo.photo.clone(), MatchResult::Unknown);
                continue;
            }
            for identity in known {
                out.groups
                    .entry(identity.clone())
                    .or_default()
                    .insert(photo.photo.clone());
            }
        }
        self.place_failed(&mut out, report);
        out
    }

    fn place(&self, out: &mut PhotoGroup, photo: PathBuf, result: MatchResult) {
        match result {
            MatchResult::Known(identity) => {
                out.groups.entry(identity).or_default().insert(photo);
            }
            MatchResult::Unknown => {
                if self.options.unknown == UnknownPolicy::Collect {
                    out.unknown.insert(photo);
                }
            }
        }
    }

    fn place_failed<T>(&self, out: &mut PhotoGroup, report: &BatchReport<T>) {
        if !self.options.failed_as_unknown {
            return;
        }
        for diagnostic in &report.diagnostics {
            self.place(out, diagnostic.path.clone(), MatchResult::Unknown);
        }
    }
}
