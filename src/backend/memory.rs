//! Thread-safe in-memory backend.
//!
//! Grounded on the reference `Memory` store: a flat table behind a single
//! lock per key-shard. `dashmap` gives per-shard locking for free, so `cas`
//! is linearisable per key without a crate-wide mutex.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::backend::KvBackend;
use crate::errors::KvGitResult;

#[derive(Default)]
pub struct MemoryBackend {
    map: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> KvGitResult<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> KvGitResult<()> {
        self.map.remove(key);
        Ok(())
    }

    fn keys(&self) -> KvGitResult<Vec<String>> {
        Ok(self.map.iter().map(|e| e.key().clone()).collect())
    }

    fn cas(&self, key: &str, new_value: Vec<u8>, expected: Option<&[u8]>) -> KvGitResult<bool> {
        match self.map.entry(key.to_string()) {
            Entry::Occupied(mut entry) => match expected {
                Some(exp) if entry.get().as_slice() == exp => {
                    entry.insert(new_value);
                    Ok(true)
                }
                _ => Ok(false),
            },
            Entry::Vacant(entry) => {
                if expected.is_none() {
                    entry.insert(new_value);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn clear(&self) -> KvGitResult<()> {
        self.map.clear();
        Ok(())
    }
}
