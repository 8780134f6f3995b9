//! Convenience factory (§10.8): build a ready-to-use [`Staged`] store in one
//! call instead of wiring a backend, a [`View`], and an optional [`GcView`]
//! by hand.

use std::path::Path;
use std::sync::Arc;

use crate::backend::{KvBackend, MemoryBackend};
use crate::config::GcConfig;
use crate::errors::{KvGitError, KvGitResult};
use crate::gc::GcView;
use crate::staged::Staged;
use crate::view::View;

/// Which concrete backend [`open_store`] should build.
pub enum StoreKind<'a> {
    /// In-memory, backed by [`MemoryBackend`].
    Memory,
    /// Disk-persisted, backed by `SledBackend` at `path`. Only available
    /// with the `disk` feature.
    #[cfg(feature = "disk")]
    Disk(&'a Path),
    #[cfg(not(feature = "disk"))]
    #[doc(hidden)]
    Disk(std::marker::PhantomData<&'a Path>),
}

/// Build a store with sensible defaults: a `"main"` branch unless overridden,
/// and GC disabled unless `gc` is supplied.
pub fn open_store(kind: StoreKind, branch: &str, gc: Option<GcConfig>) -> KvGitResult<Staged> {
    let backend: Arc<dyn KvBackend> = match kind {
        StoreKind::Memory => Arc::new(MemoryBackend::new()),
        #[cfg(feature = "disk")]
        StoreKind::Disk(path) => Arc::new(crate::backend::SledBackend::open(path)?),
        #[cfg(not(feature = "disk"))]
        StoreKind::Disk(_) => {
            return Err(KvGitError::InvalidArgument(
                "disk-backed stores require the 'disk' feature".to_string(),
            ))
        }
    };

    match gc {
        Some(config) => Ok(Staged::new_with_gc(GcView::open(backend, branch, config)?)),
        None => Ok(Staged::new(View::open(backend, branch)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_opens_on_main_by_default() {
        let mut store = open_store(StoreKind::Memory, "main", None).unwrap();
        assert_eq!(store.view().current_branch(), "main");
        store.set("a", b"1".to_vec());
        let result = store.flush(crate::merge::OnConflict::Raise, None).unwrap();
        assert!(result.merged);
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn gc_config_produces_a_gc_backed_store() {
        let config = GcConfig::new(1_000_000, None).unwrap();
        let mut store = open_store(StoreKind::Memory, "main", Some(config)).unwrap();
        store.set("a", b"1".to_vec());
        let result = store.flush(crate::merge::OnConflict::Raise, None).unwrap();
        assert!(result.merged);
    }
}
