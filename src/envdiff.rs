//! Pure functions for computing and applying a diff between two
//! environment mappings.
//!
//! Environments are stored as `BTreeMap<Vec<u8>, Vec<u8>>` rather than
//! `HashMap` so that iteration is already in ascending key order — the
//! on-disk format requires keys sorted ascending for canonical bytes, and a
//! sorted map makes that a non-event rather than a serialization-time sort.

use std::collections::{BTreeMap, BTreeSet};

/// An opaque-bytes environment mapping.
pub type Env = BTreeMap<Vec<u8>, Vec<u8>>;

/// The result of comparing a `modified` environment against a `base` one:
/// keys present in `base` but missing from `modified`, and keys that are
/// new or changed in `modified`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvDiff {
    /// Keys present in the base environment but absent from the modified
    /// one. Always disjoint from `changed`'s keys.
    pub removed: BTreeSet<Vec<u8>>,
    /// Keys that are new in the modified environment, or whose value
    /// differs from the base.
    pub changed: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Compute the diff that transforms `base` into `modified`.
pub fn diff(base: &Env, modified: &Env) -> EnvDiff {
    let removed = base
        .keys()
        .filter(|k| !modified.contains_key(*k))
        .cloned()
        .collect();

    let changed = modified
        .iter()
        .filter(|(k, v)| base.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    EnvDiff { removed, changed }
}

/// Reconstruct the modified environment from `base` and a previously
/// computed [`EnvDiff`].
///
/// Removing a key that is not present in `base` is tolerated silently
/// (a no-op), rather than treated as corruption, so that decoding stays
/// forward-compatible with files produced by writers that diff against a
/// slightly different notion of "base".
pub fn apply(base: &Env, diff: &EnvDiff) -> Env {
    let mut result = base.clone();
    for key in &diff.removed {
        result.remove(key);
    }
    for (key, value) in &diff.changed {
        result.insert(key.clone(), value.clone());
    }
    result
}
