//! Versioned core (C4): the read-through view, local commit construction,
//! CAS-based HEAD advance, and three-way merge.
//!
//! A [`View`] is the single-threaded unit of concurrency the spec this
//! crate implements describes in §5: it holds its own in-memory snapshot
//! of a branch's state and coordinates with other views only through CAS
//! on the branch head key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::backend::KvBackend;
use crate::codec::{self, InfoMap, Keyset, MetaMap};
use crate::commit_builder::{self, AssembledCommit};
use crate::config::default_is_protected;
use crate::errors::{KvGitError, KvGitResult};
use crate::graph::{self, DiffResult, HistoryMode};
use crate::hash::CommitId;
use crate::merge::{MergeFn, MergeRegistry, MergeResult, MergeStrategy, OnConflict};
use crate::records::Records;

/// An in-memory handle on a single branch at a known commit.
///
/// Not `Sync` by convention (§5: "views are not safe to share between
/// threads without external synchronisation") even though nothing here
/// stops the compiler from doing so via interior mutability-free fields —
/// the backend is the only thing actually shared across threads.
pub struct View {
    records: Records,
    branch: String,
    current_commit: CommitId,
    base_commit: CommitId,
    commit_keys: Keyset,
    meta: MetaMap,
    touch_counter: u64,
    merge_fns: MergeRegistry,
    pub last_merge_result: Option<MergeResult>,
}

impl View {
    /// Open a view on `branch`, creating the branch (and an initial empty
    /// root commit) if neither exists yet.
    pub fn open(backend: Arc<dyn KvBackend>, branch: &str) -> KvGitResult<Self> {
        validate_branch_name(branch)?;
        let records = Records::new(backend);

        let commit_hash = match records.branch_head(branch)? {
            Some(id) => id,
            None => {
                let bootstrapped = bootstrap_root(&records, branch)?;
                // Another view may have raced us to create the branch;
                // whichever CAS won is authoritative.
                records.branch_head(branch)?.unwrap_or(bootstrapped)
            }
        };

        Self::at(records, branch, commit_hash)
    }

    /// Build a view already pinned to `commit_hash`; `base_commit` starts
    /// equal to `current_commit` (mirrors the Python dialect's
    /// `Versioned.__init__(commit_hash=...)` path, used both by `open` and
    /// by [`View::checkout`]).
    fn at(records: Records, branch: &str, commit_hash: CommitId) -> KvGitResult<Self> {
        let commit_keys = records.load_keyset(&commit_hash)?;
        let meta = records.load_meta(&commit_hash)?;
        let touch_counter = meta.values().map(|m| m.last_touch).max().unwrap_or(0);

        Ok(Self {
            records,
            branch: branch.to_string(),
            current_commit: commit_hash.clone(),
            base_commit: commit_hash,
            commit_keys,
            meta,
            touch_counter,
            merge_fns: MergeRegistry::default(),
            last_merge_result: None,
        })
    }

    pub fn current_commit(&self) -> &CommitId {
        &self.current_commit
    }

    pub fn base_commit(&self) -> &CommitId {
        &self.base_commit
    }

    pub fn current_branch(&self) -> &str {
        &self.branch
    }

    pub(crate) fn records(&self) -> &Records {
        &self.records
    }

    /// Read HEAD directly from the backend — reflects other writers.
    pub fn latest_head(&self) -> KvGitResult<Option<CommitId>> {
        self.records.branch_head(&self.branch)
    }

    /// The root commit of the current commit's linear history.
    pub fn initial_commit(&self) -> KvGitResult<CommitId> {
        let chain = graph::history(&self.records, &self.current_commit, HistoryMode::Linear)?;
        Ok(chain.into_iter().last().unwrap_or_else(|| self.current_commit.clone()))
    }

    // -- Read operations --

    /// Look up `key` in the current commit's keyset, bumping its touch
    /// stamp in memory on a hit. The stamp is only persisted on the next
    /// `commit()`.
    pub fn get(&mut self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        let Some(pointer) = self.commit_keys.get(key).cloned() else {
            return Ok(None);
        };
        let value = self.records.backend().get(&pointer)?;
        if value.is_some() {
            self.touch(key);
        }
        Ok(value)
    }

    /// Fetch several keys in one backend batch call. The batch is over
    /// pointer resolution, not a backend snapshot (§5).
    pub fn get_many(&mut self, keys: &[&str]) -> KvGitResult<BTreeMap<String, Vec<u8>>> {
        let mut pointer_to_key = BTreeMap::new();
        for key in keys {
            if let Some(pointer) = self.commit_keys.get(*key) {
                pointer_to_key.insert(pointer.clone(), (*key).to_string());
            }
        }
        if pointer_to_key.is_empty() {
            return Ok(BTreeMap::new());
        }
        let pointers: Vec<&str> = pointer_to_key.keys().map(|s| s.as_str()).collect();
        let raw = self.records.backend().get_many(&pointers)?;

        let mut out = BTreeMap::new();
        for (pointer, value) in raw {
            if let Some(key) = pointer_to_key.get(&pointer) {
                self.touch(key);
                out.insert(key.clone(), value);
            }
        }
        Ok(out)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.commit_keys.keys()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.commit_keys.contains_key(key)
    }

    // -- Merge function registry --

    pub fn set_merge_fn(&mut self, key: impl Into<String>, f: MergeFn) {
        self.merge_fns.set_merge_fn(key, f);
    }

    pub fn set_default_merge(&mut self, f: MergeFn) {
        self.merge_fns.set_default_merge(f);
    }

    // -- Write operations --

    /// Top-level `commit()`: the no-op / fast-forward / three-way dispatch
    /// of §4.3.
    pub fn commit(
        &mut self,
        updates: BTreeMap<String, Vec<u8>>,
        removals: BTreeSet<String>,
        on_conflict: OnConflict,
        merge_fns: Option<&std::collections::HashMap<String, MergeFn>>,
        default_merge: Option<&MergeFn>,
        info: Option<InfoMap>,
    ) -> KvGitResult<MergeResult> {
        if updates.is_empty() && removals.is_empty() && info.is_none() {
            let result = MergeResult::no_op(self.current_commit.clone());
            self.last_merge_result = Some(result.clone());
            return Ok(result);
        }

        let current_head = self.latest_head()?;
        if current_head.as_ref() == Some(&self.base_commit) {
            return self.fast_forward(updates, removals, info, on_conflict);
        }

        let Some(their_head) = current_head else {
            return Err(KvGitError::InvalidArgument(format!(
                "branch '{}' has no HEAD",
                self.branch
            )));
        };

        let snapshot = self.snapshot_state();
        self.apply_local_commit(updates, removals, None, false)?;
        let result = self.three_way_merge(&their_head, on_conflict, merge_fns, default_merge, info, Some(snapshot));
        if let Ok(r) = &result {
            self.last_merge_result = Some(r.clone());
        }
        result
    }

    fn snapshot_state(&self) -> (CommitId, Keyset, MetaMap, u64) {
        (
            self.current_commit.clone(),
            self.commit_keys.clone(),
            self.meta.clone(),
            self.touch_counter,
        )
    }

    fn restore_state(&mut self, saved: (CommitId, Keyset, MetaMap, u64)) {
        self.current_commit = saved.0;
        self.commit_keys = saved.1;
        self.meta = saved.2;
        self.touch_counter = saved.3;
    }

    /// Build a local commit from the current state and write it to the
    /// backend, without advancing HEAD. Used by the fast-forward path
    /// (single parent) and, with `info = None`, by the three-way path's
    /// "ours" construction.
    ///
    /// Raises `MissingCommitRecord` if `current_commit` itself has gone
    /// missing from the backend (§7.4: advancing from a missing record is
    /// the one place forward-read degradation doesn't apply).
    fn apply_local_commit(
        &mut self,
        updates: BTreeMap<String, Vec<u8>>,
        removals: BTreeSet<String>,
        info: Option<&InfoMap>,
        force_fresh_created_at: bool,
    ) -> KvGitResult<AssembledCommit> {
        self.records.require_commit_exists(&self.current_commit)?;
        let touch_value = commit_builder::next_touch_value(&self.meta);
        let assembled = commit_builder::assemble(
            &[self.current_commit.clone()],
            self.commit_keys.clone(),
            &removals,
            self.meta.clone(),
            touch_value,
            &updates,
            info,
            force_fresh_created_at,
        )?;

        write_commit_batch(
            &self.records,
            &assembled,
            &[self.current_commit.clone()],
            info,
        )?;

        self.commit_keys = assembled.keyset.clone();
        self.current_commit = assembled.id.clone();
        self.meta = assembled.meta.clone();
        self.touch_counter = touch_value;

        Ok(assembled)
    }

    fn fast_forward(
        &mut self,
        updates: BTreeMap<String, Vec<u8>>,
        removals: BTreeSet<String>,
        info: Option<InfoMap>,
        on_conflict: OnConflict,
    ) -> KvGitResult<MergeResult> {
        let saved = self.snapshot_state();
        self.apply_local_commit(updates, removals, info.as_ref(), false)?;

        let branch_key = crate::records::branch_head_key(&self.branch);
        let expected = saved.0.clone().into_bytes();
        let new_head = self.current_commit.clone().into_bytes();

        if self.records.backend().cas(&branch_key, new_head, Some(&expected))? {
            self.base_commit = self.current_commit.clone();
            let result = MergeResult {
                merged: true,
                commit: Some(self.current_commit.clone()),
                strategy: MergeStrategy::FastForward,
                auto_merged_keys: BTreeSet::new(),
                carried_keys: self.commit_keys.keys().cloned().collect(),
            };
            self.last_merge_result = Some(result.clone());
            tracing::debug!(branch = %self.branch, commit = %self.current_commit, "fast-forward commit advanced HEAD");
            return Ok(result);
        }

        tracing::warn!(branch = %self.branch, base = %saved.0, "fast-forward CAS lost the race");
        self.restore_state(saved.clone());
        if on_conflict == OnConflict::Abandon {
            let result = MergeResult::abandoned(MergeStrategy::FastForward);
            self.last_merge_result = Some(result.clone());
            return Ok(result);
        }
        Err(KvGitError::Concurrency(format!(
            "HEAD changed from {}. Refresh and retry.",
            saved.0
        )))
    }

    #[allow(clippy::too_many_arguments)]
    fn three_way_merge(
        &mut self,
        their_head: &CommitId,
        on_conflict: OnConflict,
        merge_fns: Option<&std::collections::HashMap<String, MergeFn>>,
        default_merge: Option<&MergeFn>,
        info: Option<InfoMap>,
        saved_state: Option<(CommitId, Keyset, MetaMap, u64)>,
    ) -> KvGitResult<MergeResult> {
        let lca = graph::find_lca(&self.records, &self.current_commit, their_head)?;
        let Some(lca) = lca else {
            if let Some(saved) = saved_state {
                self.restore_state(saved);
            }
            if on_conflict == OnConflict::Abandon {
                return Ok(MergeResult::abandoned(MergeStrategy::ThreeWay));
            }
            return Err(KvGitError::Concurrency(
                "no common ancestor found between current commit and HEAD".to_string(),
            ));
        };

        let our_diff = graph::diff(&self.records, &lca, &self.current_commit)?;
        let their_diff = graph::diff(&self.records, &lca, their_head)?;

        let lca_keyset = self.records.load_keyset(&lca)?;
        let our_keyset = self.commit_keys.clone();
        let their_keyset = self.records.load_keyset(their_head)?;

        let our_changed: BTreeSet<String> = our_diff
            .added
            .iter()
            .chain(&our_diff.removed)
            .chain(&our_diff.modified)
            .cloned()
            .collect();
        let their_changed: BTreeSet<String> = their_diff
            .added
            .iter()
            .chain(&their_diff.removed)
            .chain(&their_diff.modified)
            .cloned()
            .collect();
        let all_changed: BTreeSet<String> = our_changed.union(&their_changed).cloned().collect();

        let all_keys: BTreeSet<String> = our_keyset.keys().chain(their_keyset.keys()).cloned().collect();

        let mut merged_keyset: Keyset = BTreeMap::new();
        let mut merged_values: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut auto_merged: BTreeSet<String> = BTreeSet::new();
        let mut conflicts: BTreeSet<String> = BTreeSet::new();
        let mut merge_errors: BTreeMap<String, String> = BTreeMap::new();

        // Unchanged by either side: carry from HEAD, falling back to ours.
        for key in all_keys.difference(&all_changed) {
            if let Some(pointer) = their_keyset.get(key) {
                merged_keyset.insert(key.clone(), pointer.clone());
            } else if let Some(pointer) = our_keyset.get(key) {
                merged_keyset.insert(key.clone(), pointer.clone());
            }
        }

        // Changed only by us.
        for key in our_changed.difference(&their_changed) {
            if our_diff.removed.contains(key) {
                continue;
            }
            if let Some(pointer) = our_keyset.get(key) {
                merged_keyset.insert(key.clone(), pointer.clone());
                auto_merged.insert(key.clone());
            }
        }

        // Changed only by them.
        for key in their_changed.difference(&our_changed) {
            if their_diff.removed.contains(key) {
                continue;
            }
            if let Some(pointer) = their_keyset.get(key) {
                merged_keyset.insert(key.clone(), pointer.clone());
            }
        }

        // Contested: changed by both.
        let contested: BTreeSet<String> = our_changed.intersection(&their_changed).cloned().collect();
        for key in &contested {
            let our_removed = our_diff.removed.contains(key);
            let their_removed = their_diff.removed.contains(key);

            if our_removed && their_removed {
                continue;
            }

            if !our_removed && !their_removed && our_keyset.get(key) == their_keyset.get(key) {
                merged_keyset.insert(key.clone(), their_keyset[key].clone());
                continue;
            }

            let fn_for_key = merge_fns
                .and_then(|m| m.get(key))
                .or_else(|| self.merge_fns.get(key))
                .or(default_merge)
                .or_else(|| self.merge_fns.default_fn());

            let Some(resolver) = fn_for_key else {
                conflicts.insert(key.clone());
                continue;
            };

            let old_val = match lca_keyset.get(key) {
                Some(pointer) => self.records.backend().get(pointer)?,
                None => None,
            };
            let our_val = if our_removed {
                None
            } else {
                our_keyset.get(key).and_then(|p| self.records.backend().get(p).ok().flatten())
            };
            let their_val = if their_removed {
                None
            } else {
                their_keyset.get(key).and_then(|p| self.records.backend().get(p).ok().flatten())
            };

            match resolver(old_val.as_deref(), our_val.as_deref(), their_val.as_deref()) {
                Ok(merged) => {
                    merged_values.insert(key.clone(), merged);
                    auto_merged.insert(key.clone());
                }
                Err(e) => {
                    conflicts.insert(key.clone());
                    merge_errors.insert(key.clone(), e);
                }
            }
        }

        if !conflicts.is_empty() {
            tracing::warn!(branch = %self.branch, keys = ?conflicts, "three-way merge left unresolved conflicts");
            if let Some(saved) = saved_state {
                self.restore_state(saved);
            }
            return Err(KvGitError::MergeConflict {
                conflicting_keys: conflicts,
                merge_errors,
            });
        }

        let parents = vec![their_head.clone(), self.current_commit.clone()];
        let merge_id = codec::preview_commit_id(&parents, &merged_keyset, &merged_values, info.as_ref())?;

        let mut blobs = BTreeMap::new();
        for (key, value) in &merged_values {
            let pointer = crate::hash::blob_pointer(&merge_id, key);
            merged_keyset.insert(key.clone(), pointer.clone());
            blobs.insert(pointer, value.clone());
        }

        let our_meta = self.meta.clone();
        let their_meta = self.records.load_meta(their_head)?;
        let now = chrono::Utc::now().timestamp();
        let mut touch = self.touch_counter;
        let mut merged_meta = MetaMap::new();
        for key in merged_keyset.keys() {
            if let Some(value) = merged_values.get(key) {
                touch += 1;
                merged_meta.insert(
                    key.clone(),
                    crate::codec::MetaEntry {
                        last_touch: touch,
                        size: value.len() as u64,
                        created_at: now,
                    },
                );
            } else if let Some(entry) = our_meta.get(key) {
                merged_meta.insert(key.clone(), entry.clone());
            } else if let Some(entry) = their_meta.get(key) {
                merged_meta.insert(key.clone(), entry.clone());
            }
        }

        let total_size = merged_meta
            .iter()
            .filter(|(k, _)| !default_is_protected(k))
            .map(|(_, m)| m.size)
            .sum();

        let assembled = AssembledCommit {
            id: merge_id.clone(),
            keyset: merged_keyset,
            meta: merged_meta,
            total_size,
            blobs,
        };
        write_commit_batch(&self.records, &assembled, &parents, info.as_ref())?;

        let branch_key = crate::records::branch_head_key(&self.branch);
        let expected = their_head.clone().into_bytes();
        let new_head = merge_id.clone().into_bytes();

        if self.records.backend().cas(&branch_key, new_head, Some(&expected))? {
            self.commit_keys = assembled.keyset;
            self.current_commit = merge_id.clone();
            self.base_commit = merge_id.clone();
            self.meta = assembled.meta;
            self.touch_counter = touch;

            let carried_keys: BTreeSet<String> = self
                .commit_keys
                .keys()
                .filter(|k| !auto_merged.contains(*k) && !merged_values.contains_key(*k))
                .cloned()
                .collect();

            tracing::debug!(branch = %self.branch, commit = %merge_id, auto_merged = auto_merged.len(), "three-way merge advanced HEAD");
            return Ok(MergeResult {
                merged: true,
                commit: Some(merge_id),
                strategy: MergeStrategy::ThreeWay,
                auto_merged_keys: auto_merged,
                carried_keys,
            });
        }

        tracing::warn!(branch = %self.branch, their_head = %their_head, "three-way merge CAS lost the race");
        if let Some(saved) = saved_state {
            self.restore_state(saved);
        }
        if on_conflict == OnConflict::Abandon {
            return Ok(MergeResult::abandoned(MergeStrategy::ThreeWay));
        }
        Err(KvGitError::Concurrency(
            "HEAD changed during three-way merge. Refresh and retry.".to_string(),
        ))
    }

    /// Discard any local-only commits and reload from HEAD.
    pub fn refresh(&mut self) -> KvGitResult<()> {
        let head = self
            .records
            .branch_head(&self.branch)?
            .ok_or_else(|| KvGitError::InvalidArgument(format!("no HEAD commit found for branch '{}'", self.branch)))?;
        self.load_commit(head, true)?;
        tracing::debug!(branch = %self.branch, commit = %self.current_commit, "refreshed view from HEAD");
        Ok(())
    }

    /// Return a new view at a historical commit. Reads are served from
    /// that commit's keyset; writes never advance a branch unless
    /// `branch` names one whose head happens to equal this commit later.
    pub fn checkout(&self, commit_id: &str, branch: Option<&str>) -> KvGitResult<Option<View>> {
        if !self.records.commit_exists(commit_id)? {
            return Ok(None);
        }
        let target_branch = branch.unwrap_or(&self.branch);
        Ok(Some(Self::at(self.records.clone(), target_branch, commit_id.to_string())?))
    }

    /// Force HEAD to `commit_id` directly (no CAS, no merge). Returns
    /// `false` if the commit doesn't exist.
    pub fn reset_to(&mut self, commit_id: &str) -> KvGitResult<bool> {
        if !self.records.commit_exists(commit_id)? {
            return Ok(false);
        }
        let branch_key = crate::records::branch_head_key(&self.branch);
        self.records.backend().set(&branch_key, commit_id.as_bytes().to_vec())?;
        self.load_commit(commit_id.to_string(), true)?;
        Ok(true)
    }

    fn load_commit(&mut self, commit_id: CommitId, update_base: bool) -> KvGitResult<()> {
        self.current_commit = commit_id.clone();
        if update_base {
            self.base_commit = commit_id.clone();
        }
        self.commit_keys = self.records.load_keyset(&commit_id)?;
        self.meta = self.records.load_meta(&commit_id)?;
        self.touch_counter = self.meta.values().map(|m| m.last_touch).max().unwrap_or(0);
        Ok(())
    }

    fn touch(&mut self, key: &str) {
        if let Some(entry) = self.meta.get_mut(key) {
            self.touch_counter += 1;
            entry.last_touch = self.touch_counter;
        }
    }

    // -- History / diff / parents --

    pub fn history(&self, from: Option<&str>, mode: HistoryMode) -> KvGitResult<Vec<CommitId>> {
        let start = from.unwrap_or(&self.current_commit);
        graph::history(&self.records, start, mode)
    }

    pub fn diff(&self, a: &str, b: &str) -> KvGitResult<DiffResult> {
        graph::diff(&self.records, a, b)
    }

    pub fn parents(&self, commit_id: Option<&str>) -> KvGitResult<Vec<CommitId>> {
        let target = commit_id.unwrap_or(&self.current_commit);
        self.records.load_parents(target)
    }

    pub fn commit_info(&self, commit_id: Option<&str>) -> KvGitResult<Option<InfoMap>> {
        let target = commit_id.unwrap_or(&self.current_commit);
        self.records.load_info(target)
    }

    // -- Branch registry (C5) --

    /// Fork `at` (default: current commit) onto a new branch, returning a
    /// view already switched to it.
    pub fn create_branch(&self, name: &str, at: Option<&str>) -> KvGitResult<View> {
        validate_branch_name(name)?;
        let target = at.unwrap_or(&self.current_commit).to_string();
        if at.is_some() && !self.records.commit_exists(&target)? {
            return Err(KvGitError::InvalidArgument(format!("commit '{target}' does not exist")));
        }
        let branch_key = crate::records::branch_head_key(name);
        if !self.records.backend().cas(&branch_key, target.clone().into_bytes(), None)? {
            return Err(KvGitError::InvalidArgument(format!("branch '{name}' already exists")));
        }
        tracing::debug!(branch = name, at = %target, "created branch");
        Self::at(self.records.clone(), name, target)
    }

    /// Remove a branch's head record. Refuses to delete the current
    /// branch. Commits stay in the backend and may become orphans.
    pub fn delete_branch(&self, name: &str) -> KvGitResult<()> {
        if name == self.branch {
            return Err(KvGitError::InvalidArgument("cannot delete the current branch".to_string()));
        }
        let branch_key = crate::records::branch_head_key(name);
        if !self.records.backend().contains(&branch_key)? {
            return Err(KvGitError::InvalidArgument(format!("branch '{name}' does not exist")));
        }
        self.records.backend().remove(&branch_key)?;
        tracing::debug!(branch = name, "deleted branch");
        Ok(())
    }

    /// Switch this view to another branch in place, reloading from its
    /// HEAD.
    pub fn switch_branch(&mut self, name: &str) -> KvGitResult<()> {
        let head = self
            .records
            .branch_head(name)?
            .ok_or_else(|| KvGitError::InvalidArgument(format!("branch '{name}' does not exist")))?;
        self.branch = name.to_string();
        self.load_commit(head, true)?;
        Ok(())
    }

    /// Read a key through another branch's HEAD without switching or
    /// touching meta.
    pub fn peek(&self, key: &str, branch: &str) -> KvGitResult<Option<Vec<u8>>> {
        let Some(head) = self.records.branch_head(branch)? else {
            return Ok(None);
        };
        let keyset = self.records.load_keyset(&head)?;
        let Some(pointer) = keyset.get(key) else {
            return Ok(None);
        };
        self.records.backend().get(pointer)
    }

    pub fn list_branches(&self) -> KvGitResult<Vec<String>> {
        self.records.list_branches()
    }

    /// Force this view's in-memory state to match a commit a GC rebase
    /// already wrote and won its own CAS for. Bypasses the normal
    /// commit/load path since the rebase has already done the bookkeeping.
    pub(crate) fn force_state(&mut self, commit_id: CommitId, keyset: Keyset, meta: MetaMap, branch: &str) {
        self.branch = branch.to_string();
        self.touch_counter = meta.values().map(|m| m.last_touch).max().unwrap_or(0);
        self.current_commit = commit_id.clone();
        self.base_commit = commit_id;
        self.commit_keys = keyset;
        self.meta = meta;
    }
}

fn validate_branch_name(name: &str) -> KvGitResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(KvGitError::InvalidArgument(format!(
            "invalid branch name '{name}': must be non-empty and must not contain '/'"
        )));
    }
    Ok(())
}

/// Create the initial empty root commit for a brand-new branch.
fn bootstrap_root(records: &Records, branch: &str) -> KvGitResult<CommitId> {
    let id = codec::preview_commit_id(&[], &Keyset::new(), &BTreeMap::new(), None)?;
    let assembled = AssembledCommit {
        id: id.clone(),
        keyset: Keyset::new(),
        meta: MetaMap::new(),
        total_size: 0,
        blobs: BTreeMap::new(),
    };
    write_commit_batch(records, &assembled, &[], None)?;
    let branch_key = crate::records::branch_head_key(branch);
    records.backend().cas(&branch_key, id.clone().into_bytes(), None)?;
    tracing::debug!(branch, commit = %id, "bootstrapped initial root commit");
    Ok(id)
}

/// Write every reserved record plus new blobs for `assembled` in a single
/// backend batch.
fn write_commit_batch(
    records: &Records,
    assembled: &AssembledCommit,
    parents: &[CommitId],
    info: Option<&InfoMap>,
) -> KvGitResult<()> {
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    for (pointer, value) in &assembled.blobs {
        entries.push((pointer.clone(), value.clone()));
    }
    entries.push((
        crate::records::commit_keyset_key(&assembled.id),
        codec::encode_keyset(&assembled.keyset)?,
    ));
    entries.push((
        crate::records::parent_commit_key(&assembled.id),
        codec::encode_parents(parents)?,
    ));
    entries.push((crate::records::meta_key(&assembled.id), codec::encode_meta(&assembled.meta)?));
    entries.push((
        crate::records::total_var_size_key(&assembled.id),
        codec::encode_total_size(assembled.total_size),
    ));
    if let Some(info) = info {
        entries.push((crate::records::info_key(&assembled.id), codec::encode_info(info)?));
    }
    records.backend().set_many(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    fn open(branch: &str) -> View {
        View::open(Arc::new(MemoryBackend::new()), branch).unwrap()
    }

    fn updates(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn no_op_commit_returns_current_id() {
        let mut view = open("main");
        let before = view.current_commit().clone();
        let result = view
            .commit(BTreeMap::new(), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        assert_eq!(result.strategy, MergeStrategy::NoOp);
        assert_eq!(result.commit, Some(before));
    }

    #[test]
    fn fast_forward_carries_forward_unrelated_keys() {
        let mut view = open("main");
        view.commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        view.commit(updates(&[("b", b"2")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        assert_eq!(view.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(view.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn removal_drops_key() {
        let mut view = open("main");
        view.commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        view.commit(BTreeMap::new(), BTreeSet::from(["a".to_string()]), OnConflict::Raise, None, None, None)
            .unwrap();
        assert_eq!(view.get("a").unwrap(), None);
    }

    #[test]
    fn disjoint_writers_auto_merge_via_three_way() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = View::open(backend.clone(), "main").unwrap();
        let mut b = View::open(backend, "main").unwrap();

        a.commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        let result = b
            .commit(updates(&[("b", b"2")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        assert_eq!(result.strategy, MergeStrategy::ThreeWay);
        assert!(result.auto_merged_keys.contains("b"));
        assert_eq!(b.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(b.get("b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn counter_merge_resolves_contested_key() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = View::open(backend.clone(), "main").unwrap();
        a.commit(updates(&[("hits", b"10")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        let mut b = View::open(backend.clone(), "main").unwrap();
        assert_eq!(b.get("hits").unwrap(), Some(b"10".to_vec()));
        b.set_merge_fn("hits", crate::typed::counter());

        a.commit(updates(&[("hits", b"15")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        let result = b
            .commit(updates(&[("hits", b"20")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        assert!(result.merged);
        assert_eq!(result.strategy, MergeStrategy::ThreeWay);
        assert_eq!(b.get("hits").unwrap(), Some(b"25".to_vec()));
    }

    #[test]
    fn remove_vs_modify_without_resolver_conflicts() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = View::open(backend.clone(), "main").unwrap();
        a.commit(updates(&[("k", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        let mut b = View::open(backend.clone(), "main").unwrap();
        a.commit(BTreeMap::new(), BTreeSet::from(["k".to_string()]), OnConflict::Raise, None, None, None)
            .unwrap();

        let err = b
            .commit(updates(&[("k", b"2")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap_err();
        assert!(matches!(err, KvGitError::MergeConflict { .. }));
    }

    #[test]
    fn both_sides_writing_identical_bytes_does_not_conflict() {
        let backend = Arc::new(MemoryBackend::new());
        let mut a = View::open(backend.clone(), "main").unwrap();
        let mut b = View::open(backend.clone(), "main").unwrap();

        a.commit(updates(&[("k", b"same")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        let result = b
            .commit(updates(&[("k", b"same")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        assert!(result.merged);
        assert_eq!(b.get("k").unwrap(), Some(b"same".to_vec()));
    }

    #[test]
    fn abandon_on_conflict_returns_falsy_result_without_raising() {
        let backend = Arc::new(MemoryBackend::new());
        let mut view = View::open(backend.clone(), "main").unwrap();
        // Simulate a concurrent peer advancing HEAD underneath us.
        let branch_key = crate::records::branch_head_key("main");
        backend.set(&branch_key, b"some-other-commit".to_vec()).unwrap();

        let result = view
            .commit(updates(&[("k", b"1")]), BTreeSet::new(), OnConflict::Abandon, None, None, None)
            .unwrap();
        assert!(!result.merged);
    }

    #[test]
    fn branch_isolation() {
        let backend = Arc::new(MemoryBackend::new());
        let mut main = View::open(backend, "main").unwrap();
        let mut dev = main.create_branch("dev", None).unwrap();

        main.commit(updates(&[("x", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        dev.commit(updates(&[("y", b"2")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        assert_eq!(main.get("y").unwrap(), None);
        assert_eq!(dev.get("x").unwrap(), None);
        assert_eq!(main.list_branches().unwrap(), vec!["dev".to_string(), "main".to_string()]);
    }

    #[test]
    fn peek_reads_another_branch_without_switching() {
        let backend = Arc::new(MemoryBackend::new());
        let mut main = View::open(backend, "main").unwrap();
        let mut dev = main.create_branch("dev", None).unwrap();
        dev.commit(updates(&[("y", b"2")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        assert_eq!(main.peek("y", "dev").unwrap(), Some(b"2".to_vec()));
        assert_eq!(main.get("y").unwrap(), None);
    }

    #[test]
    fn refresh_reloads_from_head_after_concurrency_error() {
        let backend = Arc::new(MemoryBackend::new());
        let mut view = View::open(backend.clone(), "main").unwrap();
        let original = view.current_commit().clone();

        let branch_key = crate::records::branch_head_key("main");
        backend.set(&branch_key, b"injected".to_vec()).unwrap();
        // Not a real commit id, but refresh() degrades gracefully per §7 for
        // forward reads of a missing record.
        view.refresh().unwrap();
        assert_ne!(view.current_commit(), &original);
        assert_eq!(view.current_commit(), "injected");
    }

    #[test]
    fn checkout_reads_are_served_from_the_historical_commit() {
        let mut view = open("main");
        view.commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        let snap = view.current_commit().clone();
        view.commit(BTreeMap::new(), BTreeSet::from(["a".to_string()]), OnConflict::Raise, None, None, None)
            .unwrap();

        let mut historical = view.checkout(&snap, None).unwrap().unwrap();
        assert_eq!(historical.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn diff_identity_and_roundtrip() {
        let mut view = open("main");
        let a = view.current_commit().clone();
        view.commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        let b = view.current_commit().clone();

        let identity = view.diff(&b, &b).unwrap();
        assert!(identity.added.is_empty() && identity.removed.is_empty() && identity.modified.is_empty());

        let d = view.diff(&a, &b).unwrap();
        assert_eq!(d.added, BTreeSet::from(["a".to_string()]));
    }

    #[test]
    fn commit_raises_on_missing_commit_record() {
        let backend = Arc::new(MemoryBackend::new());
        let mut view = View::open(backend.clone(), "main").unwrap();
        // Simulate corruption: the current commit's meta record vanishes
        // out from under the view.
        backend.remove(&crate::records::meta_key(view.current_commit())).unwrap();

        let err = view
            .commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap_err();
        assert!(matches!(err, KvGitError::MissingCommitRecord { .. }));
    }

    #[test]
    fn info_only_commit_is_not_a_no_op() {
        let mut view = open("main");
        let before = view.current_commit().clone();
        let mut info = InfoMap::new();
        info.insert("author".to_string(), serde_json::json!("agent-1"));
        let result = view
            .commit(BTreeMap::new(), BTreeSet::new(), OnConflict::Raise, None, None, Some(info))
            .unwrap();
        assert!(result.merged);
        assert_ne!(result.commit.unwrap(), before);
    }
}
