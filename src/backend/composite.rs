//! Tiered-cache backend.
//!
//! Grounded on the reference `Composite` store: an ordered list of tiers
//! from fastest to authoritative. Reads check each tier in order and
//! backfill faster tiers on a hit; writes go to the authoritative (last)
//! tier and are opportunistically propagated to every faster tier.

use std::sync::Arc;

use crate::backend::KvBackend;
use crate::errors::KvGitResult;

pub struct CompositeBackend {
    /// Ordered fastest-first; the last tier is authoritative.
    tiers: Vec<Arc<dyn KvBackend>>,
}

impl CompositeBackend {
    /// `tiers` ordered fastest-first; the last entry is authoritative for
    /// both CAS and durability.
    pub fn new(tiers: Vec<Arc<dyn KvBackend>>) -> Self {
        assert!(!tiers.is_empty(), "CompositeBackend needs at least one tier");
        Self { tiers }
    }

    fn authoritative(&self) -> &Arc<dyn KvBackend> {
        self.tiers.last().expect("at least one tier")
    }

    fn faster_tiers(&self) -> &[Arc<dyn KvBackend>] {
        &self.tiers[..self.tiers.len() - 1]
    }
}

impl KvBackend for CompositeBackend {
    fn get(&self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        for (i, tier) in self.tiers.iter().enumerate() {
            if let Some(value) = tier.get(key)? {
                for faster in &self.tiers[..i] {
                    let _ = faster.set(key, value.clone());
                }
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> KvGitResult<()> {
        self.authoritative().set(key, value.clone())?;
        for tier in self.faster_tiers() {
            let _ = tier.set(key, value.clone());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> KvGitResult<()> {
        self.authoritative().remove(key)?;
        for tier in self.faster_tiers() {
            let _ = tier.remove(key);
        }
        Ok(())
    }

    fn keys(&self) -> KvGitResult<Vec<String>> {
        self.authoritative().keys()
    }

    fn cas(&self, key: &str, new_value: Vec<u8>, expected: Option<&[u8]>) -> KvGitResult<bool> {
        let swapped = self.authoritative().cas(key, new_value.clone(), expected)?;
        if swapped {
            for tier in self.faster_tiers() {
                let _ = tier.set(key, new_value.clone());
            }
        }
        Ok(swapped)
    }

    fn clear(&self) -> KvGitResult<()> {
        for tier in &self.tiers {
            tier.clear()?;
        }
        Ok(())
    }
}
