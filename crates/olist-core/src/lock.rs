//! Cross-client mutual exclusion over a plain blob store.
//!
//! The store has no atomic lock primitive, only create, list, and delete
//! with store-assigned modification times. A client that wants the list
//! writes a lock record named after itself, then repeatedly lists every
//! record of that list ordered by modification time. Whoever owns the oldest
//! surviving record holds the lock, which gives a FIFO ticket queue.
//!
//! Records older than the staleness threshold are deleted by whoever sees
//! them first, so a crashed client cannot wedge a list forever. A waiter
//! whose own record was evicted that way writes it again and rejoins at the
//! back of the queue.
//!
//! Layout, next to the list blob:
//!
//! ```text
//! groceries.list
//! .groceries.lock3f9a0c1d2b4e5f60   # content: the owning client id
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::ErrorCode;
use crate::store::{BlobEntry, BlobStore, StoreError};

/// Default age after which any participant may evict a lock record.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10);

/// Default pause between two polls of the lock queue.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Name prefix shared by every lock record of `list`.
#[must_use]
pub fn lock_prefix(list: &str) -> String {
    format!(".{list}.lock")
}

/// Name of `client_id`'s lock record for `list`.
#[must_use]
pub fn lock_record_path(list: &str, client_id: &str) -> String {
    format!("{}{client_id}", lock_prefix(list))
}

/// Generate a process-unique client identifier.
#[must_use]
pub fn new_client_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Timing knobs of the lock protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Records older than this are presumed abandoned.
    pub stale_after: Duration,
    /// Sleep between polls while another client holds the lock.
    pub retry_interval: Duration,
    /// Give up after this long. `None` waits until acquired or cancelled.
    pub acquire_timeout: Option<Duration>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            acquire_timeout: None,
        }
    }
}

/// Lock acquisition failures.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("{}: lock on list {list:?} timed out after {waited:?}", ErrorCode::LockContention)]
    Timeout { list: String, waited: Duration },

    #[error("{}: lock on list {list:?} interrupted after {waited:?}", ErrorCode::LockInterrupted)]
    Interrupted { list: String, waited: Duration },

    #[error("{}: {0}", ErrorCode::TransportFailed)]
    Store(#[from] StoreError),
}

impl LockError {
    /// Machine-readable code associated with this lock error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Interrupted { .. } => ErrorCode::LockInterrupted,
            Self::Store(_) => ErrorCode::TransportFailed,
        }
    }

    /// Optional remediation hint for users.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// A lock record observed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub path: String,
    pub owner: String,
    pub modified: SystemTime,
}

impl LockRecord {
    /// Age relative to the local clock; zero for records stamped in the
    /// future.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.modified.elapsed().unwrap_or_default()
    }
}

/// One client's handle on the lock protocol.
pub struct DistributedLock {
    store: Arc<dyn BlobStore>,
    client_id: String,
    config: LockConfig,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("client_id", &self.client_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DistributedLock {
    pub fn new(store: Arc<dyn BlobStore>, client_id: impl Into<String>, config: LockConfig) -> Self {
        Self {
            store,
            client_id: client_id.into(),
            config,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub const fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Block until this client holds the lock on `list`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Store`] when writing or listing records fails.
    /// - [`LockError::Timeout`] when `acquire_timeout` elapses first.
    /// - [`LockError::Interrupted`] when `cancel` fires while waiting.
    ///
    /// On timeout, interruption, or a failed listing the record written by
    /// this call is deleted again on a best-effort basis.
    #[instrument(skip(self, cancel), fields(client = %self.client_id))]
    pub fn lock(&self, list: &str, cancel: &CancelToken) -> Result<ListLock<'_>, LockError> {
        let own = lock_record_path(list, &self.client_id);
        let prefix = lock_prefix(list);
        let started = Instant::now();

        self.write_record(&own)?;

        loop {
            let mut queue = match self.store.list_children(&prefix) {
                Ok(queue) => queue,
                Err(err) => {
                    self.unlock(list);
                    return Err(err.into());
                }
            };
            queue.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
            let queue = self.evict_stale(queue, &own);

            match queue.first() {
                Some(head) if head.path == own => {
                    info!(list, waited = ?started.elapsed(), "lock acquired");
                    return Ok(ListLock {
                        lock: self,
                        list: list.to_owned(),
                    });
                }
                Some(head) => {
                    debug!(list, holder = %head.path, queued = queue.len(), "lock busy");
                }
                None => {}
            }

            if !queue.iter().any(|entry| entry.path == own) {
                warn!(list, "own lock record vanished while waiting; rejoining queue");
                self.write_record(&own)?;
            }

            let waited = started.elapsed();
            if let Some(limit) = self.config.acquire_timeout {
                if waited >= limit {
                    self.unlock(list);
                    return Err(LockError::Timeout {
                        list: list.to_owned(),
                        waited,
                    });
                }
            }

            if cancel.sleep(self.config.retry_interval) {
                self.unlock(list);
                return Err(LockError::Interrupted {
                    list: list.to_owned(),
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Delete this client's lock record for `list`.
    ///
    /// Failures are logged and otherwise ignored; a leftover record is
    /// evicted by other clients once it turns stale.
    pub fn unlock(&self, list: &str) {
        let own = lock_record_path(list, &self.client_id);
        match self.store.delete_blob(&own) {
            Ok(()) => debug!(list, "lock released"),
            Err(err) => warn!(list, error = %err, "failed to delete lock record"),
        }
    }

    /// Current lock records of `list`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store error when listing fails.
    pub fn records(&self, list: &str) -> Result<Vec<LockRecord>, StoreError> {
        let prefix = lock_prefix(list);
        let mut entries = self.store.list_children(&prefix)?;
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(entries
            .into_iter()
            .map(|entry| LockRecord {
                owner: entry
                    .path
                    .strip_prefix(prefix.as_str())
                    .unwrap_or_default()
                    .to_owned(),
                path: entry.path,
                modified: entry.modified,
            })
            .collect())
    }

    fn write_record(&self, own: &str) -> Result<(), StoreError> {
        let mut content = self.client_id.clone().into_bytes();
        content.push(b'\n');
        self.store.put_blob(own, &content)
    }

    /// Drop stale records from the front of an oldest-first queue, deleting
    /// them from the store. Stops at the first fresh record.
    fn evict_stale(&self, queue: Vec<BlobEntry>, own: &str) -> Vec<BlobEntry> {
        let now = SystemTime::now();
        let mut remaining = queue.into_iter().peekable();
        while let Some(oldest) = remaining.peek() {
            let age = now.duration_since(oldest.modified).unwrap_or_default();
            if age <= self.config.stale_after {
                break;
            }
            if oldest.path == own {
                debug!(path = %oldest.path, ?age, "own lock record went stale");
            } else {
                warn!(path = %oldest.path, ?age, "evicting stale lock record");
            }
            if let Err(err) = self.store.delete_blob(&oldest.path) {
                warn!(path = %oldest.path, error = %err, "failed to evict stale lock record");
            }
            remaining.next();
        }
        remaining.collect()
    }
}

/// Held lock on one list. Dropping it deletes the lock record.
#[derive(Debug)]
pub struct ListLock<'a> {
    lock: &'a DistributedLock,
    list: String,
}

impl ListLock<'_> {
    #[must_use]
    pub fn list(&self) -> &str {
        &self.list
    }

    /// Explicitly release the lock. Release also happens automatically on
    /// drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ListLock<'_> {
    fn drop(&mut self) {
        self.lock.unlock(&self.list);
    }
}
