//! Error types for the versioned key-value store.
//!
//! This module defines a unified error enumeration used across commit
//! construction, branch management, merge resolution, and garbage
//! collection. It integrates with `thiserror` to provide `Display`
//! implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - `MergeConflict` and `Concurrency` are control-flow signals a caller
//!   is expected to catch and act on (retry after `refresh()`, register
//!   a resolver) rather than unrecoverable failures.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Unified error enumeration for the versioned key-value store.
#[derive(Error, Debug)]
pub enum KvGitError {
    /// A compare-and-swap on a branch head lost the race to another writer.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// At least one key involved in a three-way merge had no resolver, or
    /// its resolver raised. Carries the conflicting keys and, per key, the
    /// resolver's error message (if a resolver ran and failed).
    #[error("merge conflict on keys: {conflicting_keys:?}")]
    MergeConflict {
        conflicting_keys: BTreeSet<String>,
        merge_errors: BTreeMap<String, String>,
    },

    /// Invalid argument supplied by the caller (bad branch name, unknown
    /// `on_conflict` mode, non-positive `high_water_bytes`, deleting the
    /// current branch, unknown commit id, etc.).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A commit record required to advance was missing from the backend.
    /// Forward reads degrade to "empty" for missing records; only an
    /// advance (commit, rebase) from a missing record raises this.
    #[error("missing commit record for `{commit_id}`")]
    MissingCommitRecord { commit_id: String },

    /// A reserved record (keyset, parents, meta, total-size, info) failed to
    /// deserialize from the backend.
    #[error("corrupt record at key `{0}`: {1}")]
    CorruptRecord(String, String),

    /// Error surfaced by the underlying byte KV backend.
    #[error("backend error: {0}")]
    Backend(String),
}

pub type KvGitResult<T> = Result<T, KvGitError>;
