//! Reserved-key layout and record load/save helpers shared by the core,
//! the branch registry, and GC.
//!
//! Key patterns (§3 of the spec this crate implements):
//!
//! | Pattern | Meaning |
//! |---|---|
//! | `__commit_keyset__<id>` | serialized keyset |
//! | `__parent_commit__<id>` | serialized parent sequence |
//! | `__branch_head__<name>` | branch head (single commit id) |
//! | `__meta__<id>` | serialized per-key meta |
//! | `__total_var_size__<id>` | serialized cumulative user-bytes |
//! | `__info__<id>` | serialized info mapping (present only if supplied) |
//! | `<commit_id>:<user_key>` | a blob |

use std::sync::Arc;

use crate::backend::KvBackend;
use crate::codec::{self, InfoMap, Keyset, MetaMap};
use crate::errors::{KvGitError, KvGitResult};
use crate::hash::CommitId;

pub fn commit_keyset_key(id: &str) -> String {
    format!("__commit_keyset__{id}")
}

pub fn parent_commit_key(id: &str) -> String {
    format!("__parent_commit__{id}")
}

pub fn branch_head_key(name: &str) -> String {
    format!("__branch_head__{name}")
}

pub fn meta_key(id: &str) -> String {
    format!("__meta__{id}")
}

pub fn total_var_size_key(id: &str) -> String {
    format!("__total_var_size__{id}")
}

pub fn info_key(id: &str) -> String {
    format!("__info__{id}")
}

/// Prefix shared by every branch head key, for enumeration.
pub const BRANCH_HEAD_PREFIX: &str = "__branch_head__";

/// Thin read/write layer over the reserved-key layout. Holds a shared
/// handle to the backend; cheap to clone (an `Arc` bump) since views and GC
/// both need their own copy.
#[derive(Clone)]
pub struct Records {
    backend: Arc<dyn KvBackend>,
}

impl Records {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }

    /// Empty if the commit is absent or a root (degrade gracefully per §7).
    pub fn load_parents(&self, id: &str) -> KvGitResult<Vec<CommitId>> {
        match self.backend.get(&parent_commit_key(id))? {
            Some(bytes) => codec::decode_parents(&parent_commit_key(id), &bytes),
            None => Ok(Vec::new()),
        }
    }

    /// Empty if absent (degrade gracefully per §7).
    pub fn load_keyset(&self, id: &str) -> KvGitResult<Keyset> {
        match self.backend.get(&commit_keyset_key(id))? {
            Some(bytes) => codec::decode_keyset(&commit_keyset_key(id), &bytes),
            None => Ok(Keyset::new()),
        }
    }

    /// Empty if absent (degrade gracefully per §7).
    pub fn load_meta(&self, id: &str) -> KvGitResult<MetaMap> {
        match self.backend.get(&meta_key(id))? {
            Some(bytes) => codec::decode_meta(&meta_key(id), &bytes),
            None => Ok(MetaMap::new()),
        }
    }

    pub fn load_total_size(&self, id: &str) -> KvGitResult<u64> {
        match self.backend.get(&total_var_size_key(id))? {
            Some(bytes) => codec::decode_total_size(&total_var_size_key(id), &bytes),
            None => Ok(0),
        }
    }

    pub fn load_info(&self, id: &str) -> KvGitResult<Option<InfoMap>> {
        match self.backend.get(&info_key(id))? {
            Some(bytes) => Ok(Some(codec::decode_info(&info_key(id), &bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a commit record exists at all (used by advance paths, which
    /// must raise rather than degrade on a missing parent).
    pub fn commit_exists(&self, id: &str) -> KvGitResult<bool> {
        self.backend.contains(&meta_key(id))
    }

    pub fn require_commit_exists(&self, id: &str) -> KvGitResult<()> {
        if self.commit_exists(id)? {
            Ok(())
        } else {
            Err(KvGitError::MissingCommitRecord {
                commit_id: id.to_string(),
            })
        }
    }

    pub fn branch_head(&self, name: &str) -> KvGitResult<Option<CommitId>> {
        match self.backend.get(&branch_head_key(name))? {
            Some(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            None => Ok(None),
        }
    }

    pub fn list_branches(&self) -> KvGitResult<Vec<String>> {
        let mut names: Vec<String> = self
            .backend
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(BRANCH_HEAD_PREFIX).map(|s| s.to_string()))
            .collect();
        names.sort();
        Ok(names)
    }
}
