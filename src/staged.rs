//! Staged writes (C8): buffer updates/removals in memory and flush them as
//! a single `commit()` call.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::InfoMap;
use crate::errors::KvGitResult;
use crate::gc::GcView;
use crate::merge::{MergeResult, OnConflict};
use crate::view::View;

/// Either a plain view or one with GC attached — [`Staged::flush`] dispatches
/// to whichever is underneath without the caller needing to care.
enum Inner {
    Plain(View),
    Gc(GcView),
}

impl Inner {
    fn get(&mut self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        match self {
            Inner::Plain(v) => v.get(key),
            Inner::Gc(g) => g.view_mut().get(key),
        }
    }

    fn commit(
        &mut self,
        updates: BTreeMap<String, Vec<u8>>,
        removals: BTreeSet<String>,
        on_conflict: OnConflict,
        info: Option<InfoMap>,
    ) -> KvGitResult<MergeResult> {
        match self {
            Inner::Plain(v) => v.commit(updates, removals, on_conflict, None, None, info),
            Inner::Gc(g) => g.commit(updates, removals, on_conflict, None, None, info),
        }
    }
}

/// Buffers `set`/`remove` calls against a [`View`] (optionally GC-supervised
/// via [`GcView`]) without touching the backend until [`Staged::flush`]. A
/// later `set` for a key already buffered for removal (or vice versa) simply
/// overwrites the earlier intent — last call for a given key wins.
pub struct Staged {
    inner: Inner,
    updates: BTreeMap<String, Vec<u8>>,
    removals: BTreeSet<String>,
}

impl Staged {
    pub fn new(view: View) -> Self {
        Self {
            inner: Inner::Plain(view),
            updates: BTreeMap::new(),
            removals: BTreeSet::new(),
        }
    }

    pub fn new_with_gc(view: GcView) -> Self {
        Self {
            inner: Inner::Gc(view),
            updates: BTreeMap::new(),
            removals: BTreeSet::new(),
        }
    }

    pub fn view(&self) -> &View {
        match &self.inner {
            Inner::Plain(v) => v,
            Inner::Gc(g) => g.view(),
        }
    }

    pub fn view_mut(&mut self) -> &mut View {
        match &mut self.inner {
            Inner::Plain(v) => v,
            Inner::Gc(g) => g.view_mut(),
        }
    }

    /// Read-through: a pending local write is visible before it's flushed.
    pub fn get(&mut self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        if self.removals.contains(key) {
            return Ok(None);
        }
        if let Some(value) = self.updates.get(key) {
            return Ok(Some(value.clone()));
        }
        self.inner.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) {
        let key = key.into();
        self.removals.remove(&key);
        self.updates.insert(key, value);
    }

    pub fn remove(&mut self, key: impl Into<String>) {
        let key = key.into();
        self.updates.remove(&key);
        self.removals.insert(key);
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.updates.is_empty() || !self.removals.is_empty()
    }

    pub fn discard_pending(&mut self) {
        self.updates.clear();
        self.removals.clear();
    }

    /// Commit every buffered change in one call and clear the buffer, even
    /// if the commit fails (partial application would leave buffered state
    /// out of sync with what's already landed).
    pub fn flush(&mut self, on_conflict: OnConflict, info: Option<InfoMap>) -> KvGitResult<MergeResult> {
        let updates = std::mem::take(&mut self.updates);
        let removals = std::mem::take(&mut self.removals);
        self.inner.commit(updates, removals, on_conflict, info)
    }
}
