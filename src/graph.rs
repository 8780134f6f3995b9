//! Commit graph operations (C3): history traversal, diff, and lowest
//! common ancestor search.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::errors::KvGitResult;
use crate::hash::CommitId;
use crate::records::Records;

/// How [`history`] walks the graph from a starting commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    /// Start, then its first parent, repeatedly, until a root is reached.
    Linear,
    /// BFS over every parent edge (both entries of a merge commit); each
    /// commit yielded once.
    AllParents,
}

/// `{added, removed, modified}` between two commits' keysets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffResult {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub modified: BTreeSet<String>,
}

/// Linear history starting at `start`, terminating at a root commit.
pub fn history_linear(records: &Records, start: &str) -> KvGitResult<Vec<CommitId>> {
    let mut out = Vec::new();
    let mut current = start.to_string();
    loop {
        out.push(current.clone());
        let parents = records.load_parents(&current)?;
        match parents.first() {
            Some(p) => current = p.clone(),
            None => break,
        }
    }
    Ok(out)
}

/// Every commit reachable from `start` via any parent edge, each yielded
/// once. Order is BFS discovery order, not guaranteed otherwise.
pub fn history_all_parents(records: &Records, start: &str) -> KvGitResult<Vec<CommitId>> {
    let mut seen: HashSet<CommitId> = HashSet::new();
    let mut queue: VecDeque<CommitId> = VecDeque::new();
    let mut out = Vec::new();

    seen.insert(start.to_string());
    queue.push_back(start.to_string());

    while let Some(id) = queue.pop_front() {
        out.push(id.clone());
        for parent in records.load_parents(&id)? {
            if seen.insert(parent.clone()) {
                queue.push_back(parent);
            }
        }
    }
    Ok(out)
}

pub fn history(records: &Records, start: &str, mode: HistoryMode) -> KvGitResult<Vec<CommitId>> {
    match mode {
        HistoryMode::Linear => history_linear(records, start),
        HistoryMode::AllParents => history_all_parents(records, start),
    }
}

/// `added = keys(b) - keys(a)`, `removed = keys(a) - keys(b)`, `modified =
/// { k in both : pointer_a(k) != pointer_b(k) }`. Because pointers encode
/// `commit_id:user_key`, "same pointer" implies "same content and same
/// point of introduction" — exactly the carried-forward test.
pub fn diff(records: &Records, a: &str, b: &str) -> KvGitResult<DiffResult> {
    let keyset_a = records.load_keyset(a)?;
    let keyset_b = records.load_keyset(b)?;

    let mut result = DiffResult::default();
    for (key, pointer_b) in keyset_b.iter() {
        match keyset_a.get(key) {
            None => {
                result.added.insert(key.clone());
            }
            Some(pointer_a) if pointer_a != pointer_b => {
                result.modified.insert(key.clone());
            }
            Some(_) => {}
        }
    }
    for key in keyset_a.keys() {
        if !keyset_b.contains_key(key) {
            result.removed.insert(key.clone());
        }
    }
    Ok(result)
}

/// Interleaved BFS from both endpoints. Returns the first commit seen by
/// both sides. Not necessarily the unique LCA under criss-cross merge
/// histories (documented limitation, Open Question #2) — sufficient because
/// the merge algorithm only needs a common ancestor whose diffs are
/// well-defined.
pub fn find_lca(records: &Records, a: &str, b: &str) -> KvGitResult<Option<CommitId>> {
    if a == b {
        return Ok(Some(a.to_string()));
    }

    let mut seen_a: HashSet<CommitId> = HashSet::new();
    let mut seen_b: HashSet<CommitId> = HashSet::new();
    let mut queue_a: VecDeque<CommitId> = VecDeque::new();
    let mut queue_b: VecDeque<CommitId> = VecDeque::new();

    seen_a.insert(a.to_string());
    queue_a.push_back(a.to_string());
    seen_b.insert(b.to_string());
    queue_b.push_back(b.to_string());

    while !queue_a.is_empty() || !queue_b.is_empty() {
        if let Some(id) = queue_a.pop_front() {
            if seen_b.contains(&id) {
                return Ok(Some(id));
            }
            for parent in records.load_parents(&id)? {
                if seen_b.contains(&parent) {
                    return Ok(Some(parent));
                }
                if seen_a.insert(parent.clone()) {
                    queue_a.push_back(parent);
                }
            }
        }
        if let Some(id) = queue_b.pop_front() {
            if seen_a.contains(&id) {
                return Ok(Some(id));
            }
            for parent in records.load_parents(&id)? {
                if seen_a.contains(&parent) {
                    return Ok(Some(parent));
                }
                if seen_b.insert(parent.clone()) {
                    queue_b.push_back(parent);
                }
            }
        }
    }
    Ok(None)
}
