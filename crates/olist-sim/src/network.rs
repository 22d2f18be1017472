//! A blob store wrapper that adds seeded latency and transient faults.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use olist_core::store::{BlobEntry, BlobStore, StoreError, StoreOp};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// Link behaviour between one client and the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Upper bound of the per-call delay, in milliseconds.
    pub max_latency_ms: u64,
    /// Chance that a list-content read or write fails.
    pub fault_percent: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 3,
            fault_percent: 10,
        }
    }
}

#[derive(Debug)]
struct LinkState {
    rng: DeterministicRng,
    faults_enabled: bool,
    faults_injected: usize,
}

/// One client's view of the shared store.
///
/// Faults only hit list content, never lock records, so a faulted
/// transaction still cleans up after itself.
pub struct SimulatedLink {
    shared: Arc<dyn BlobStore>,
    config: LinkConfig,
    state: Mutex<LinkState>,
}

impl std::fmt::Debug for SimulatedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLink")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SimulatedLink {
    #[must_use]
    pub fn new(shared: Arc<dyn BlobStore>, config: LinkConfig, rng: DeterministicRng) -> Self {
        Self {
            shared,
            config,
            state: Mutex::new(LinkState {
                rng,
                faults_enabled: true,
                faults_injected: 0,
            }),
        }
    }

    /// Stop injecting faults; latency stays.
    pub fn heal(&self) {
        self.lock_state().faults_enabled = false;
    }

    #[must_use]
    pub fn faults_injected(&self) -> usize {
        self.lock_state().faults_injected
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transit(&self, op: StoreOp, path: &str) -> Result<(), StoreError> {
        let (delay, fail) = {
            let mut state = self.lock_state();
            let delay = state.rng.next_bounded(self.config.max_latency_ms.saturating_add(1));
            let content = !path.starts_with('.') && matches!(op, StoreOp::Get | StoreOp::Put);
            let fail = content
                && state.faults_enabled
                && state.rng.hit_rate_percent(self.config.fault_percent);
            if fail {
                state.faults_injected += 1;
            }
            (delay, fail)
        };
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if fail {
            tracing::debug!(%op, path, "injecting transport fault");
            return Err(StoreError::new(
                op,
                path,
                io::Error::new(io::ErrorKind::TimedOut, "simulated link fault"),
            ));
        }
        Ok(())
    }
}

impl BlobStore for SimulatedLink {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.transit(StoreOp::Get, path)?;
        self.shared.get_blob(path)
    }

    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.transit(StoreOp::Put, path)?;
        self.shared.put_blob(path, bytes)
    }

    fn delete_blob(&self, path: &str) -> Result<(), StoreError> {
        self.transit(StoreOp::Delete, path)?;
        self.shared.delete_blob(path)
    }

    fn list_children(&self, prefix: &str) -> Result<Vec<BlobEntry>, StoreError> {
        self.transit(StoreOp::List, prefix)?;
        self.shared.list_children(prefix)
    }
}
