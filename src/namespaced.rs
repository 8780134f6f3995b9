//! Namespaced views (C8): prefix every user-visible key with a fixed
//! namespace so unrelated tenants can share one branch without key
//! collisions.

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::InfoMap;
use crate::errors::KvGitResult;
use crate::merge::{MergeFn, MergeResult, OnConflict};
use crate::view::View;

/// Wraps a [`View`], transparently prepending `"{namespace}/"` to every key
/// on the way in and stripping it on the way out. `list_keys`/`diff` only
/// ever see keys inside the namespace.
pub struct Namespaced {
    view: View,
    namespace: String,
}

impl Namespaced {
    pub fn new(view: View, namespace: impl Into<String>) -> Self {
        Self {
            view,
            namespace: namespace.into(),
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut View {
        &mut self.view
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}/{key}", self.namespace)
    }

    pub fn get(&mut self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        self.view.get(&self.full_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.view.contains(&self.full_key(key))
    }

    /// Keys visible in this namespace, with the prefix stripped.
    pub fn keys(&self) -> Vec<String> {
        let prefix = format!("{}/", self.namespace);
        self.view
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(|s| s.to_string()))
            .collect()
    }

    pub fn set_merge_fn(&mut self, key: impl AsRef<str>, f: MergeFn) {
        self.view.set_merge_fn(self.full_key(key.as_ref()), f);
    }

    pub fn commit(
        &mut self,
        updates: BTreeMap<String, Vec<u8>>,
        removals: BTreeSet<String>,
        on_conflict: OnConflict,
        info: Option<InfoMap>,
    ) -> KvGitResult<MergeResult> {
        let prefix = format!("{}/", self.namespace);
        let namespaced_updates = updates.into_iter().map(|(k, v)| (format!("{prefix}{k}"), v)).collect();
        let namespaced_removals = removals.into_iter().map(|k| format!("{prefix}{k}")).collect();
        self.view.commit(namespaced_updates, namespaced_removals, on_conflict, None, None, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    fn updates(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_vec())).collect()
    }

    #[test]
    fn namespaces_do_not_collide() {
        let backend = Arc::new(MemoryBackend::new());
        let mut tenant_a = Namespaced::new(View::open(backend.clone(), "main").unwrap(), "tenant-a");
        let mut tenant_b = Namespaced::new(View::open(backend, "main").unwrap(), "tenant-b");

        tenant_a
            .commit(updates(&[("cfg", b"a")]), BTreeSet::new(), OnConflict::Raise, None)
            .unwrap();
        tenant_b
            .commit(updates(&[("cfg", b"b")]), BTreeSet::new(), OnConflict::Raise, None)
            .unwrap();

        tenant_b.view_mut().refresh().unwrap();
        assert_eq!(tenant_a.get("cfg").unwrap(), Some(b"a".to_vec()));
        assert_eq!(tenant_b.get("cfg").unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn keys_strips_namespace_prefix() {
        let backend = Arc::new(MemoryBackend::new());
        let mut ns = Namespaced::new(View::open(backend, "main").unwrap(), "tenant-a");
        ns.commit(updates(&[("cfg", b"1"), ("limit", b"2")]), BTreeSet::new(), OnConflict::Raise, None)
            .unwrap();
        let mut keys = ns.keys();
        keys.sort();
        assert_eq!(keys, vec!["cfg".to_string(), "limit".to_string()]);
    }
}
