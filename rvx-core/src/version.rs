use std::{cmp::Ordering, fmt::Display};

use serde::Serialize;

/// A dotted version string reported as supported by a patch-set, or given by the user.
///
/// Ordered by its numeric components compared as integers. Components which are not plain
/// numbers (e.g. `beta2`) are ignored when ordering, but kept in the string.
/// Versions with equal numeric components are ordered by their string, so that distinct
/// strings are never equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VersionCandidate(String);

impl VersionCandidate {
    /// Trims whitespace and any leading `v` from `version`.
    pub fn new(version: &str) -> Self {
        let trimmed = version.trim();
        let without_prefix = trimmed
            .strip_prefix(['v', 'V'])
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            .unwrap_or(trimmed);
        Self(without_prefix.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric components used for ordering.
    pub fn sort_key(&self) -> Vec<u64> {
        self.0
            .split('.')
            .filter(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|part| part.parse().ok())
            .collect()
    }
}

impl Ord for VersionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for VersionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for VersionCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sorts and deduplicates `versions`, newest first.
pub fn sort_descending(versions: impl IntoIterator<Item = VersionCandidate>) -> Vec<VersionCandidate> {
    let mut sorted: Vec<_> = versions.into_iter().collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    sorted
}
