//! Write-behind backend: buffers writes and drains them on a background
//! worker thread.
//!
//! Grounded on the reference `WriteBehind` store. Uses a single worker
//! thread (the teacher's existing worker-thread idiom from its pack
//! pipeline, not an async runtime the core doesn't otherwise need) draining
//! a channel in FIFO order; `flush()` enqueues a marker and blocks until the
//! worker reaches it, which guarantees every write enqueued before the call
//! has already landed in the authoritative backend.
//!
//! `cas` bypasses the buffer entirely (after a flush, to avoid racing a
//! still-pending write for the same key) since compare-and-swap needs
//! strong consistency against the authoritative backend, not eventual
//! consistency.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::DashMap;

use crate::backend::KvBackend;
use crate::errors::{KvGitError, KvGitResult};

enum Op {
    Write(String, Option<Vec<u8>>),
    Flush(Sender<()>),
}

pub struct WriteBehindBackend {
    inner: Arc<dyn KvBackend>,
    pending: Arc<DashMap<String, Option<Vec<u8>>>>,
    tx: Sender<Op>,
    _worker: JoinHandle<()>,
}

impl WriteBehindBackend {
    pub fn new(inner: Arc<dyn KvBackend>) -> Self {
        let pending: Arc<DashMap<String, Option<Vec<u8>>>> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::channel::<Op>();

        let worker_inner = inner.clone();
        let worker_pending = pending.clone();
        let worker = thread::spawn(move || {
            while let Ok(op) = rx.recv() {
                match op {
                    Op::Write(key, value) => {
                        let applied = match &value {
                            Some(v) => worker_inner.set(&key, v.clone()),
                            None => worker_inner.remove(&key),
                        };
                        if applied.is_ok() {
                            // Only clear the overlay if nobody queued a newer
                            // write for this key behind ours.
                            if let Some(entry) = worker_pending.get(&key) {
                                if *entry == value {
                                    drop(entry);
                                    worker_pending.remove(&key);
                                }
                            }
                        }
                    }
                    Op::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            inner,
            pending,
            tx,
            _worker: worker,
        }
    }

    fn enqueue(&self, key: &str, value: Option<Vec<u8>>) -> KvGitResult<()> {
        self.pending.insert(key.to_string(), value.clone());
        self.tx
            .send(Op::Write(key.to_string(), value))
            .map_err(|e| KvGitError::Backend(e.to_string()))
    }

    /// Block until every write enqueued before this call has reached the
    /// authoritative backend.
    pub fn flush(&self) -> KvGitResult<()> {
        let (done_tx, done_rx) = mpsc::channel();
        self.tx
            .send(Op::Flush(done_tx))
            .map_err(|e| KvGitError::Backend(e.to_string()))?;
        done_rx
            .recv()
            .map_err(|e| KvGitError::Backend(e.to_string()))
    }
}

impl KvBackend for WriteBehindBackend {
    fn get(&self, key: &str) -> KvGitResult<Option<Vec<u8>>> {
        if let Some(entry) = self.pending.get(key) {
            return Ok(entry.clone());
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Vec<u8>) -> KvGitResult<()> {
        self.enqueue(key, Some(value))
    }

    fn remove(&self, key: &str) -> KvGitResult<()> {
        self.enqueue(key, None)
    }

    fn keys(&self) -> KvGitResult<Vec<String>> {
        self.flush()?;
        self.inner.keys()
    }

    fn cas(&self, key: &str, new_value: Vec<u8>, expected: Option<&[u8]>) -> KvGitResult<bool> {
        self.flush()?;
        let swapped = self.inner.cas(key, new_value, expected)?;
        Ok(swapped)
    }

    fn clear(&self) -> KvGitResult<()> {
        self.flush()?;
        self.pending.clear();
        self.inner.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn buffered_read_is_visible_before_flush() {
        let inner = Arc::new(MemoryBackend::new());
        let wb = WriteBehindBackend::new(inner.clone());
        wb.set("k", b"v".to_vec()).unwrap();
        assert_eq!(wb.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn flush_drains_to_authoritative_backend() {
        let inner = Arc::new(MemoryBackend::new());
        let wb = WriteBehindBackend::new(inner.clone());
        wb.set("k", b"v".to_vec()).unwrap();
        wb.flush().unwrap();
        assert_eq!(inner.get("k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn cas_sees_buffered_write_after_flush() {
        let inner = Arc::new(MemoryBackend::new());
        let wb = WriteBehindBackend::new(inner.clone());
        wb.set("k", b"v1".to_vec()).unwrap();
        assert!(wb.cas("k", b"v2".to_vec(), Some(b"v1")).unwrap());
    }
}
