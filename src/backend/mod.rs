//! The byte KV backend contract (C1) and its concrete implementations.
//!
//! A backend is a flat `string -> bytes` map with linearisable
//! compare-and-swap. The core never assumes anything about how a backend
//! persists or distributes its data; it only relies on the contract below,
//! matching the spec's treatment of C1 as an external collaborator
//! specified at its interface.

mod composite;
mod memory;
#[cfg(feature = "disk")]
mod sled_backend;
mod write_behind;

pub use composite::CompositeBackend;
pub use memory::MemoryBackend;
#[cfg(feature = "disk")]
pub use sled_backend::SledBackend;
pub use write_behind::WriteBehindBackend;

use crate::errors::KvGitResult;

/// Flat byte key-value store with compare-and-swap.
///
/// Every operation is synchronous (§5: "every operation on a view is
/// synchronous"); implementations that wrap an async store must block on
/// their own runtime internally rather than exposing async methods here.
pub trait KvBackend: Send + Sync {
    /// Fetch a single value.
    fn get(&self, key: &str) -> KvGitResult<Option<Vec<u8>>>;

    /// Fetch a batch of values. Absent keys are omitted from the result.
    fn get_many(&self, keys: &[&str]) -> KvGitResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for key in keys {
            if let Some(value) = self.get(key)? {
                out.push(((*key).to_string(), value));
            }
        }
        Ok(out)
    }

    /// Write a single value.
    fn set(&self, key: &str, value: Vec<u8>) -> KvGitResult<()>;

    /// Write a batch of values. Implementations SHOULD make this atomic;
    /// at minimum each key must be durable once this returns.
    fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> KvGitResult<()> {
        for (key, value) in entries {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Remove a single key. Idempotent.
    fn remove(&self, key: &str) -> KvGitResult<()>;

    /// Remove a batch of keys. Idempotent.
    fn remove_many(&self, keys: &[&str]) -> KvGitResult<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }

    /// Enumerate every key. Need not be a live snapshot.
    fn keys(&self) -> KvGitResult<Vec<String>>;

    /// Whether `key` is present.
    fn contains(&self, key: &str) -> KvGitResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Compare-and-swap: write `new_value` under `key` iff the current value
    /// equals `expected` (`None` meaning "must be absent"). Must be
    /// linearisable with respect to itself and all other writes on `key`.
    /// Returns whether the swap took effect.
    fn cas(&self, key: &str, new_value: Vec<u8>, expected: Option<&[u8]>) -> KvGitResult<bool>;

    /// Drop every key. For tests.
    fn clear(&self) -> KvGitResult<()>;
}
