//! Merge-function registry and result types (C4/C5 support, §4.5 and §9).
//!
//! A merge function resolves one contested key: `(old, ours, theirs) ->
//! merged`. The Python source models this as a raising closure; here the
//! explicit `Result` makes "resolver failed" a first-class outcome a caller
//! pattern-matches rather than a non-local exception (§9 "Exceptions as
//! signals").

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::hash::CommitId;

/// `(old, ours, theirs) -> merged`. Any of `old`/`ours`/`theirs` is `None`
/// when that side has no value (removed, or no common ancestor value).
pub type MergeFn =
    Arc<dyn Fn(Option<&[u8]>, Option<&[u8]>, Option<&[u8]>) -> Result<Vec<u8>, String> + Send + Sync>;

/// What happens when a fast-forward or merge CAS loses the race and no
/// resolver closes every conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Raise `KvGitError::Concurrency` / `KvGitError::MergeConflict`.
    Raise,
    /// Return a `MergeResult` with `merged = false` instead of raising.
    Abandon,
}

impl Default for OnConflict {
    fn default() -> Self {
        OnConflict::Raise
    }
}

/// Which path `commit()` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    NoOp,
    FastForward,
    ThreeWay,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::NoOp => "no_op",
            MergeStrategy::FastForward => "fast_forward",
            MergeStrategy::ThreeWay => "three_way",
        }
    }
}

/// Outcome of a `commit()` call. Modeled as an explicit tagged struct with
/// an `is_merged()` predicate rather than the Python dialect's
/// truthy-dataclass convention (§9 "Tagged result types").
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub merged: bool,
    pub commit: Option<CommitId>,
    pub strategy: MergeStrategy,
    pub auto_merged_keys: BTreeSet<String>,
    pub carried_keys: BTreeSet<String>,
}

impl MergeResult {
    pub fn is_merged(&self) -> bool {
        self.merged
    }

    pub fn no_op(current: CommitId) -> Self {
        Self {
            merged: true,
            commit: Some(current),
            strategy: MergeStrategy::NoOp,
            auto_merged_keys: BTreeSet::new(),
            carried_keys: BTreeSet::new(),
        }
    }

    pub fn abandoned(strategy: MergeStrategy) -> Self {
        Self {
            merged: false,
            commit: None,
            strategy,
            auto_merged_keys: BTreeSet::new(),
            carried_keys: BTreeSet::new(),
        }
    }
}

/// A view's registered merge-function table: per-key functions dominate a
/// single store-wide default. Per-call overrides (threaded through
/// `commit()`'s arguments, not stored here) dominate both.
#[derive(Default, Clone)]
pub struct MergeRegistry {
    per_key: std::collections::HashMap<String, MergeFn>,
    default_fn: Option<MergeFn>,
}

impl MergeRegistry {
    pub fn set_merge_fn(&mut self, key: impl Into<String>, f: MergeFn) {
        self.per_key.insert(key.into(), f);
    }

    pub fn set_default_merge(&mut self, f: MergeFn) {
        self.default_fn = Some(f);
    }

    pub fn get(&self, key: &str) -> Option<&MergeFn> {
        self.per_key.get(key)
    }

    pub fn default_fn(&self) -> Option<&MergeFn> {
        self.default_fn.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_key_dominates_default() {
        let mut registry = MergeRegistry::default();
        registry.set_default_merge(Arc::new(|_, _, theirs| Ok(theirs.unwrap_or_default().to_vec())));
        registry.set_merge_fn("k", Arc::new(|_, ours, _| Ok(ours.unwrap_or_default().to_vec())));

        assert!(registry.get("k").is_some());
        assert!(registry.get("other").is_none());
        assert!(registry.default_fn().is_some());
    }
}
