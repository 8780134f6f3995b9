//! Garbage collection / rebase (C6): water-mark policy, cold-key eviction,
//! rewrite-as-root, and orphan sweep.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::backend::KvBackend;
use crate::codec::{self, InfoMap, Keyset, MetaMap};
use crate::commit_builder::AssembledCommit;
use crate::config::GcConfig;
use crate::errors::{KvGitError, KvGitResult};
use crate::graph::HistoryMode;
use crate::hash::CommitId;
use crate::merge::{MergeFn, MergeResult, OnConflict};
use crate::records::{self, Records};
use crate::view::View;

/// Result of a [`GcView::rebase`] / [`GcView::maybe_rebase`] call.
#[derive(Debug, Clone)]
pub struct RebaseResult {
    pub performed: bool,
    pub new_commit: Option<CommitId>,
    pub dropped_keys: BTreeSet<String>,
    pub kept_keys: BTreeSet<String>,
    pub total_size_before: u64,
    pub total_size_after: u64,
    pub orphans_cleaned: usize,
}

impl RebaseResult {
    fn not_performed(total: u64, kept_keys: BTreeSet<String>) -> Self {
        Self {
            performed: false,
            new_commit: None,
            dropped_keys: BTreeSet::new(),
            kept_keys,
            total_size_before: total,
            total_size_after: total,
            orphans_cleaned: 0,
        }
    }
}

/// A [`View`] with built-in garbage collection. Every `commit()` auto-runs
/// the high/low water check (§4.6); `rebase()`/`clean_orphans()` are also
/// reachable directly for explicit control.
pub struct GcView {
    view: View,
    config: GcConfig,
    pub last_rebase_result: Option<RebaseResult>,
}

impl GcView {
    pub fn open(backend: Arc<dyn KvBackend>, branch: &str, config: GcConfig) -> KvGitResult<Self> {
        Ok(Self {
            view: View::open(backend, branch)?,
            config,
            last_rebase_result: None,
        })
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Commit, then run GC if the result pushed cumulative size over the
    /// high-water mark.
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &mut self,
        updates: BTreeMap<String, Vec<u8>>,
        removals: BTreeSet<String>,
        on_conflict: OnConflict,
        merge_fns: Option<&std::collections::HashMap<String, MergeFn>>,
        default_merge: Option<&MergeFn>,
        info: Option<InfoMap>,
    ) -> KvGitResult<MergeResult> {
        let result = self
            .view
            .commit(updates, removals, on_conflict, merge_fns, default_merge, info)?;
        if result.merged {
            let rebase_result = self.maybe_rebase()?;
            self.last_rebase_result = Some(rebase_result);
        }
        Ok(result)
    }

    /// Run rebase only if the total live user-key size exceeds the high
    /// water mark.
    pub fn maybe_rebase(&mut self) -> KvGitResult<RebaseResult> {
        let total = self.load_total_size()?;
        if total <= self.config.high_water_bytes {
            let kept: BTreeSet<String> = self.view.keys().cloned().collect();
            return Ok(RebaseResult::not_performed(total, kept));
        }
        self.rebase(None, None)
    }

    /// Build a fresh root commit retaining only hot (or explicitly kept)
    /// and protected keys, then clean orphans.
    pub fn rebase(&mut self, keep_keys: Option<&BTreeSet<String>>, info: Option<InfoMap>) -> KvGitResult<RebaseResult> {
        let records = self.view.records().clone();
        let current_commit = self.view.current_commit().clone();
        let base_commit = self.view.base_commit().clone();
        let branch = self.view.current_branch().to_string();

        records.require_commit_exists(&current_commit)?;
        let commit_keys = records.load_keyset(&current_commit)?;
        let meta = records.load_meta(&current_commit)?;

        let total_before: u64 = meta
            .iter()
            .filter(|(k, _)| !self.config.is_protected(k))
            .map(|(_, m)| m.size)
            .sum();

        let protected_keys: Keyset = commit_keys
            .iter()
            .filter(|(k, _)| self.config.is_protected(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let user_meta: MetaMap = meta
            .iter()
            .filter(|(k, _)| !self.config.is_protected(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut retained: BTreeSet<String> =
            protected_keys.keys().cloned().chain(user_meta.keys().cloned()).collect();
        let mut total = total_before;
        let mut dropped: Vec<String> = Vec::new();

        match keep_keys {
            Some(keep) => {
                for key in user_meta.keys() {
                    if !keep.contains(key) {
                        retained.remove(key);
                        dropped.push(key.clone());
                        total -= user_meta[key].size;
                    }
                }
            }
            None => {
                let mut candidates: Vec<(&String, &crate::codec::MetaEntry)> = user_meta.iter().collect();
                candidates.sort_by(|(_, a), (_, b)| {
                    a.last_touch.cmp(&b.last_touch).then(b.size.cmp(&a.size))
                });
                for (key, entry) in candidates {
                    if total <= self.config.low_water_bytes {
                        break;
                    }
                    retained.remove(key);
                    dropped.push(key.clone());
                    total -= entry.size;
                }
            }
        }

        let mut retained_data: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut new_meta = MetaMap::new();
        for key in &retained {
            if self.config.is_protected(key) {
                continue;
            }
            let Some(pointer) = commit_keys.get(key) else { continue };
            let Some(value) = records.backend().get(pointer)? else { continue };
            retained_data.insert(key.clone(), value);
            if let Some(entry) = meta.get(key) {
                new_meta.insert(key.clone(), entry.clone());
            }
        }

        let mut protected_data: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for (key, pointer) in &protected_keys {
            if let Some(value) = records.backend().get(pointer)? {
                protected_data.insert(key.clone(), value);
                if let Some(entry) = meta.get(key) {
                    new_meta.insert(key.clone(), entry.clone());
                }
            }
        }

        let mut rewritten_data = protected_data.clone();
        rewritten_data.extend(retained_data.iter().map(|(k, v)| (k.clone(), v.clone())));

        let new_id = codec::preview_commit_id(&[], &Keyset::new(), &rewritten_data, info.as_ref())?;

        let mut new_keyset = Keyset::new();
        let mut blobs = BTreeMap::new();
        for (key, value) in &rewritten_data {
            let new_pointer = crate::hash::blob_pointer(&new_id, key);
            new_keyset.insert(key.clone(), new_pointer.clone());
            blobs.insert(new_pointer, value.clone());
        }

        let total_after: u64 = new_meta
            .iter()
            .filter(|(k, _)| !self.config.is_protected(k))
            .map(|(_, m)| m.size)
            .sum();
        let assembled = AssembledCommit {
            id: new_id.clone(),
            keyset: new_keyset.clone(),
            meta: new_meta.clone(),
            total_size: total_after,
            blobs,
        };

        write_root_commit(&records, &assembled, info.as_ref())?;

        let branch_key = records::branch_head_key(&branch);
        let expected = base_commit.clone().into_bytes();
        if !records.backend().cas(&branch_key, new_id.clone().into_bytes(), Some(&expected))? {
            tracing::warn!(branch = %branch, base = %base_commit, "rebase CAS lost the race");
            return Err(KvGitError::Concurrency("HEAD changed during rebase.".to_string()));
        }

        let mut to_delete = Vec::new();
        for key in &dropped {
            if let Some(pointer) = commit_keys.get(key) {
                to_delete.push(pointer.as_str());
            }
        }
        if !to_delete.is_empty() {
            records.backend().remove_many(&to_delete)?;
        }

        self.view.force_state(new_id.clone(), new_keyset, new_meta, &branch);

        let orphans_cleaned = self.clean_orphans(self.config.min_age_secs)?;

        tracing::debug!(
            branch = %branch,
            new_commit = %new_id,
            dropped = dropped.len(),
            kept = retained.len(),
            orphans_cleaned,
            "rebase rewrote root commit"
        );

        Ok(RebaseResult {
            performed: true,
            new_commit: Some(new_id),
            dropped_keys: dropped.into_iter().collect(),
            kept_keys: retained,
            total_size_before: total_before,
            total_size_after: total_after,
            orphans_cleaned,
        })
    }

    /// Mark-sweep orphan removal: every commit unreachable from any branch
    /// head, older than `min_age_secs`, is deleted along with its blobs.
    pub fn clean_orphans(&self, min_age_secs: i64) -> KvGitResult<usize> {
        let records = self.view.records();
        let mut reachable: BTreeSet<CommitId> = BTreeSet::new();
        for branch in records.list_branches()? {
            if let Some(head) = records.branch_head(&branch)? {
                for commit in crate::graph::history(records, &head, HistoryMode::AllParents)? {
                    reachable.insert(commit);
                }
            }
        }

        let now = chrono::Utc::now().timestamp();
        let cutoff = now - min_age_secs;
        let meta_prefix = "__meta__";
        let mut orphans = Vec::new();

        for key in records.backend().keys()? {
            let Some(commit_id) = key.strip_prefix(meta_prefix) else { continue };
            if commit_id.is_empty() || reachable.contains(commit_id) {
                continue;
            }
            let Ok(meta) = records.load_meta(commit_id) else { continue };
            if let Some(first) = meta.values().next() {
                if first.created_at < cutoff {
                    orphans.push(commit_id.to_string());
                }
            }
        }

        for orphan in &orphans {
            if let Ok(keyset) = records.load_keyset(orphan) {
                let pointers: Vec<&str> = keyset.values().map(|s| s.as_str()).collect();
                if !pointers.is_empty() {
                    let _ = records.backend().remove_many(&pointers);
                }
            }
            let reserved_keys = [
                records::meta_key(orphan),
                records::commit_keyset_key(orphan),
                records::parent_commit_key(orphan),
                records::total_var_size_key(orphan),
                records::info_key(orphan),
            ];
            let reserved_keys: Vec<&str> = reserved_keys.iter().map(String::as_str).collect();
            let _ = records.backend().remove_many(&reserved_keys);
        }

        if !orphans.is_empty() {
            tracing::debug!(count = orphans.len(), "orphan sweep reclaimed unreachable commits");
        }
        Ok(orphans.len())
    }

    fn load_total_size(&self) -> KvGitResult<u64> {
        self.view.records().load_total_size(self.view.current_commit())
    }
}

fn write_root_commit(records: &Records, assembled: &AssembledCommit, info: Option<&InfoMap>) -> KvGitResult<()> {
    let mut entries: Vec<(String, Vec<u8>)> = Vec::new();
    for (pointer, value) in &assembled.blobs {
        entries.push((pointer.clone(), value.clone()));
    }
    entries.push((records::commit_keyset_key(&assembled.id), codec::encode_keyset(&assembled.keyset)?));
    entries.push((records::parent_commit_key(&assembled.id), codec::encode_parents(&[])?));
    entries.push((records::meta_key(&assembled.id), codec::encode_meta(&assembled.meta)?));
    entries.push((
        records::total_var_size_key(&assembled.id),
        codec::encode_total_size(assembled.total_size),
    ));
    if let Some(info) = info {
        entries.push((records::info_key(&assembled.id), codec::encode_info(info)?));
    }
    records.backend().set_many(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn updates(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn rebase_under_pressure_keeps_hottest_keys() {
        let backend = Arc::new(MemoryBackend::new());
        let config = GcConfig::new(150, Some(80)).unwrap();
        let mut gc = GcView::open(backend, "main", config).unwrap();

        gc.commit(
            updates(&[("a", &[b'a'; 20]), ("b", &[b'b'; 80]), ("c", &[b'c'; 20])]),
            BTreeSet::new(),
            OnConflict::Raise,
            None,
            None,
            None,
        )
        .unwrap();

        // Re-touch a and c so b is the only key that stays cold.
        let _ = gc.view_mut().get("a").unwrap();
        let _ = gc.view_mut().get("c").unwrap();

        gc.commit(updates(&[("d", &[b'd'; 40])]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        let result = gc.last_rebase_result.as_ref().unwrap();
        assert!(result.performed);
        assert_eq!(result.dropped_keys, BTreeSet::from(["b".to_string()]));
        assert!(result.kept_keys.contains("a"));
        assert!(result.kept_keys.contains("c"));
        assert!(result.kept_keys.contains("d"));
        let history = gc.view().history(None, HistoryMode::Linear).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn protected_keys_survive_rebase_with_content_intact() {
        let backend = Arc::new(MemoryBackend::new());
        let config = GcConfig::new(100, None).unwrap();
        let mut gc = GcView::open(backend, "main", config).unwrap();

        gc.commit(
            updates(&[("__system", &[b'x'; 200]), ("user", &[b'y'; 60])]),
            BTreeSet::new(),
            OnConflict::Raise,
            None,
            None,
            None,
        )
        .unwrap();
        gc.commit(updates(&[("trigger", &[b'z'; 20])]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();

        assert_eq!(gc.view_mut().get("__system").unwrap(), Some(vec![b'x'; 200]));
    }

    #[test]
    fn no_rebase_below_high_water() {
        let backend = Arc::new(MemoryBackend::new());
        let config = GcConfig::new(10_000, None).unwrap();
        let mut gc = GcView::open(backend, "main", config).unwrap();
        gc.commit(updates(&[("a", b"1")]), BTreeSet::new(), OnConflict::Raise, None, None, None)
            .unwrap();
        assert!(!gc.last_rebase_result.as_ref().unwrap().performed);
    }
}
