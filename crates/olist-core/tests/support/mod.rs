//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use olist_core::lock::LockConfig;
use olist_core::store::{BlobEntry, BlobStore, MemoryBlobStore, StoreError, StoreOp};
use olist_core::{RemoteStore, Syncer};

/// Lock timings short enough for tests.
pub fn fast_lock() -> LockConfig {
    LockConfig {
        stale_after: Duration::from_secs(30),
        retry_interval: Duration::from_millis(5),
        acquire_timeout: Some(Duration::from_secs(10)),
    }
}

pub fn client(store: Arc<dyn BlobStore>, id: &str, list: &str) -> (Arc<RemoteStore>, Syncer) {
    let remote = Arc::new(RemoteStore::with_client_id(store, id, fast_lock()));
    let syncer = Syncer::new(Arc::new(remote.list(list)));
    (remote, syncer)
}

type GateKey = (StoreOp, String);

#[derive(Debug, Default)]
struct GateState {
    /// Closed gates and the number of calls each may still let through.
    closed: HashMap<GateKey, usize>,
    waiting: HashMap<GateKey, usize>,
    calls: Vec<GateKey>,
}

/// In-memory store whose calls can be held at gates, so tests can pin one
/// client mid-transaction while another runs.
#[derive(Debug, Default)]
pub struct GatedStore {
    inner: MemoryBlobStore,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryBlobStore {
        &self.inner
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hold every `op` call on `path` until opened or released.
    pub fn close(&self, op: StoreOp, path: &str) {
        self.state().closed.insert((op, path.to_owned()), 0);
    }

    pub fn open(&self, op: StoreOp, path: &str) {
        self.state().closed.remove(&(op, path.to_owned()));
        self.changed.notify_all();
    }

    /// Let `n` held calls through while keeping the gate closed.
    pub fn release(&self, op: StoreOp, path: &str, n: usize) {
        if let Some(permits) = self.state().closed.get_mut(&(op, path.to_owned())) {
            *permits += n;
        }
        self.changed.notify_all();
    }

    /// Block until some call is held at the gate, or `timeout` passes.
    pub fn wait_until_held(&self, op: StoreOp, path: &str, timeout: Duration) -> bool {
        let key = (op, path.to_owned());
        let (state, result) = self
            .changed
            .wait_timeout_while(self.state(), timeout, |state| {
                state.waiting.get(&key).copied().unwrap_or(0) == 0
            })
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
        !result.timed_out()
    }

    /// Every call seen so far, in arrival order.
    pub fn calls(&self) -> Vec<(StoreOp, String)> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: StoreOp, path: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|(seen, at)| *seen == op && at == path)
            .count()
    }

    fn pass(&self, op: StoreOp, path: &str) {
        let key = (op, path.to_owned());
        let mut state = self.state();
        state.calls.push(key.clone());
        if !state.closed.contains_key(&key) {
            return;
        }
        *state.waiting.entry(key.clone()).or_default() += 1;
        self.changed.notify_all();
        loop {
            match state.closed.get_mut(&key) {
                None => break,
                Some(permits) if *permits > 0 => {
                    *permits -= 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .changed
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        if let Some(waiting) = state.waiting.get_mut(&key) {
            *waiting -= 1;
        }
        self.changed.notify_all();
    }
}

impl BlobStore for GatedStore {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.pass(StoreOp::Get, path);
        self.inner.get_blob(path)
    }

    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.pass(StoreOp::Put, path);
        self.inner.put_blob(path, bytes)
    }

    fn delete_blob(&self, path: &str) -> Result<(), StoreError> {
        self.pass(StoreOp::Delete, path);
        self.inner.delete_blob(path)
    }

    fn list_children(&self, prefix: &str) -> Result<Vec<BlobEntry>, StoreError> {
        self.pass(StoreOp::List, prefix);
        self.inner.list_children(prefix)
    }
}
