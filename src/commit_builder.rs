//! Pure assembly of a prospective commit from its parent(s), a keyset to
//! start from, and new blob values.
//!
//! Kept separate from [`crate::view`] so the core algorithm — preview id,
//! sentinel substitution, meta bookkeeping, protected-key accounting — is
//! testable without a backend. Used both for the fast-forward/local-commit
//! path (single parent, base keyset taken from that parent) and the
//! three-way merge path (two parents, base keyset assembled from the
//! carry/conflict classification).

use std::collections::BTreeMap;

use crate::codec::{self, InfoMap, Keyset, MetaEntry, MetaMap};
use crate::config::default_is_protected;
use crate::errors::KvGitResult;
use crate::hash::{blob_pointer, CommitId};

/// A fully assembled, not-yet-written commit.
pub struct AssembledCommit {
    pub id: CommitId,
    pub keyset: Keyset,
    pub meta: MetaMap,
    pub total_size: u64,
    /// Pointer -> bytes, for every new value introduced by this commit.
    pub blobs: BTreeMap<String, Vec<u8>>,
}

/// Assemble a commit.
///
/// `base_keyset` and `base_meta` reflect the parent state before this
/// commit's removals and new values are applied. `touch_value` stamps every
/// key in `new_values` (carried-forward keys keep their existing
/// `last_touch`). When `force_fresh_created_at` is set, every key in
/// `new_values` gets `created_at = now` regardless of any prior entry — used
/// by the merge path, where a resolved value is logically new content even
/// if the key previously existed on one side.
pub fn assemble(
    parents: &[CommitId],
    mut base_keyset: Keyset,
    removals: &std::collections::BTreeSet<String>,
    mut base_meta: MetaMap,
    touch_value: u64,
    new_values: &BTreeMap<String, Vec<u8>>,
    info: Option<&InfoMap>,
    force_fresh_created_at: bool,
) -> KvGitResult<AssembledCommit> {
    for key in removals {
        base_keyset.remove(key);
        base_meta.remove(key);
    }

    let id = codec::preview_commit_id(parents, &base_keyset, new_values, info)?;

    let mut keyset = base_keyset;
    let mut blobs = BTreeMap::new();
    for (key, value) in new_values {
        let pointer = blob_pointer(&id, key);
        keyset.insert(key.clone(), pointer.clone());
        blobs.insert(pointer, value.clone());
    }

    let now = chrono::Utc::now().timestamp();
    let mut meta = base_meta;
    for (key, value) in new_values {
        let created_at = if force_fresh_created_at {
            now
        } else {
            meta.get(key).map(|m| m.created_at).unwrap_or(now)
        };
        meta.insert(
            key.clone(),
            MetaEntry {
                last_touch: touch_value,
                size: value.len() as u64,
                created_at,
            },
        );
    }

    let total_size = meta
        .iter()
        .filter(|(k, _)| !default_is_protected(k))
        .map(|(_, m)| m.size)
        .sum();

    Ok(AssembledCommit {
        id,
        keyset,
        meta,
        total_size,
        blobs,
    })
}

/// Next touch stamp: one past the highest `last_touch` already present.
/// Every key written in the same commit shares this stamp (ties among
/// same-commit keys are broken by size during GC eviction).
pub fn next_touch_value(meta: &MetaMap) -> u64 {
    meta.values().map(|m| m.last_touch).max().unwrap_or(0) + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_deterministic_id_for_same_inputs() {
        let parents = vec!["p0".to_string()];
        let mut new_values = BTreeMap::new();
        new_values.insert("a".to_string(), b"1".to_vec());

        let a = assemble(
            &parents,
            Keyset::new(),
            &Default::default(),
            MetaMap::new(),
            1,
            &new_values,
            None,
            false,
        )
        .unwrap();
        let b = assemble(
            &parents,
            Keyset::new(),
            &Default::default(),
            MetaMap::new(),
            1,
            &new_values,
            None,
            false,
        )
        .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.keyset, b.keyset);
    }

    #[test]
    fn removal_drops_key_from_keyset_and_meta() {
        let mut base_keyset = Keyset::new();
        base_keyset.insert("a".to_string(), "p0:a".to_string());
        let mut base_meta = MetaMap::new();
        base_meta.insert(
            "a".to_string(),
            MetaEntry {
                last_touch: 1,
                size: 1,
                created_at: 0,
            },
        );
        let removals = std::collections::BTreeSet::from(["a".to_string()]);

        let out = assemble(
            &["p0".to_string()],
            base_keyset,
            &removals,
            base_meta,
            2,
            &BTreeMap::new(),
            None,
            false,
        )
        .unwrap();
        assert!(!out.keyset.contains_key("a"));
        assert!(!out.meta.contains_key("a"));
    }

    #[test]
    fn total_size_excludes_protected_keys() {
        let mut new_values = BTreeMap::new();
        new_values.insert("__system__".to_string(), b"big-value".to_vec());
        new_values.insert("user_key".to_string(), b"x".to_vec());

        let out = assemble(
            &["p0".to_string()],
            Keyset::new(),
            &Default::default(),
            MetaMap::new(),
            1,
            &new_values,
            None,
            false,
        )
        .unwrap();
        assert_eq!(out.total_size, 1);
    }

    #[test]
    fn preserves_created_at_unless_forced_fresh() {
        let mut base_keyset = Keyset::new();
        base_keyset.insert("a".to_string(), "p0:a".to_string());
        let mut base_meta = MetaMap::new();
        base_meta.insert(
            "a".to_string(),
            MetaEntry {
                last_touch: 1,
                size: 1,
                created_at: 42,
            },
        );
        let mut new_values = BTreeMap::new();
        new_values.insert("a".to_string(), b"2".to_vec());

        let kept = assemble(
            &["p0".to_string()],
            base_keyset.clone(),
            &Default::default(),
            base_meta.clone(),
            2,
            &new_values,
            None,
            false,
        )
        .unwrap();
        assert_eq!(kept.meta["a"].created_at, 42);

        let fresh = assemble(
            &["p0".to_string()],
            base_keyset,
            &Default::default(),
            base_meta,
            2,
            &new_values,
            None,
            true,
        )
        .unwrap();
        assert_ne!(fresh.meta["a"].created_at, 42);
    }
}
