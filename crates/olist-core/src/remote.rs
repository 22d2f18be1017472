//! Lock-guarded list content on top of a [`BlobStore`].
//!
//! Every list lives in one blob, `<name>.list`, one encoded
//! [`CheckItem`] per line. Mutations run as
//! lock → download → apply → upload → unlock, always re-reading the content
//! *after* the lock is held so a writer that waited never overwrites what
//! the previous holder wrote.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::cancel::CancelToken;
use crate::error::ErrorCode;
use crate::item::{self, CheckItem};
use crate::lock::{self, DistributedLock, LockConfig, LockError, LockRecord};
use crate::operation::Operation;
use crate::store::{BlobStore, StoreError};

/// File extension of list blobs.
pub const LIST_SUFFIX: &str = ".list";

/// Blob path holding the content of list `name`.
#[must_use]
pub fn list_blob_path(name: &str) -> String {
    format!("{name}{LIST_SUFFIX}")
}

/// Failure classes reported to error handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    LockTimeout,
    LockInterrupted,
}

/// Errors of remote list access.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{}: {0}", ErrorCode::TransportFailed)]
    Transport(#[from] StoreError),

    #[error(transparent)]
    Lock(LockError),
}

impl From<LockError> for SyncError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Store(store) => Self::Transport(store),
            other => Self::Lock(other),
        }
    }
}

impl SyncError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::Lock(LockError::Timeout { .. }) => ErrorKind::LockTimeout,
            Self::Lock(LockError::Interrupted { .. }) => ErrorKind::LockInterrupted,
            // Converted to `Transport` on the way in.
            Self::Lock(LockError::Store(_)) => ErrorKind::Transport,
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self.kind() {
            ErrorKind::Transport => ErrorCode::TransportFailed,
            ErrorKind::LockTimeout => ErrorCode::LockContention,
            ErrorKind::LockInterrupted => ErrorCode::LockInterrupted,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// The contract the sync engine needs from the remote side of one list.
///
/// Each mutation is a complete lock → read → mutate → write → unlock
/// transaction and must tolerate replay: adding a present item, removing an
/// absent one, or toggling an item that is no longer in the operand state
/// leaves the content unchanged.
pub trait ListRepository: Send + Sync {
    /// Name of the list this repository serves.
    fn name(&self) -> &str;

    /// Current remote content, malformed records dropped.
    ///
    /// # Errors
    ///
    /// [`SyncError::Transport`] when the store cannot be read.
    fn get_content(&self) -> Result<Vec<CheckItem>, SyncError>;

    /// Add each item not already present.
    ///
    /// # Errors
    ///
    /// Transport or lock failure; the content is left untouched.
    fn add(&self, items: &[CheckItem], cancel: &CancelToken) -> Result<(), SyncError>;

    /// Remove each item that is present.
    ///
    /// # Errors
    ///
    /// Transport or lock failure; the content is left untouched.
    fn remove(&self, items: &[CheckItem], cancel: &CancelToken) -> Result<(), SyncError>;

    /// Flip each item that is present in its given state.
    ///
    /// # Errors
    ///
    /// Transport or lock failure; the content is left untouched.
    fn toggle(&self, items: &[CheckItem], cancel: &CancelToken) -> Result<(), SyncError>;

    /// Commit one queued operation.
    ///
    /// # Errors
    ///
    /// Whatever the underlying mutation reports.
    fn perform(&self, op: &Operation, cancel: &CancelToken) -> Result<(), SyncError> {
        match op {
            Operation::Add(item) => self.add(std::slice::from_ref(item), cancel),
            Operation::Remove(item) => self.remove(std::slice::from_ref(item), cancel),
            Operation::Toggle(item) => self.toggle(std::slice::from_ref(item), cancel),
            Operation::Noop(_) => Ok(()),
        }
    }
}

/// A client's connection to a watchpath: raw list content plus the lock
/// protocol, under one client identity.
pub struct RemoteStore {
    store: Arc<dyn BlobStore>,
    lock: DistributedLock,
}

impl std::fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl RemoteStore {
    /// Connect with a freshly generated client identifier.
    pub fn new(store: Arc<dyn BlobStore>, lock_config: LockConfig) -> Self {
        Self::with_client_id(store, lock::new_client_id(), lock_config)
    }

    pub fn with_client_id(
        store: Arc<dyn BlobStore>,
        client_id: impl Into<String>,
        lock_config: LockConfig,
    ) -> Self {
        let lock = DistributedLock::new(Arc::clone(&store), client_id, lock_config);
        Self { store, lock }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.lock.client_id()
    }

    #[must_use]
    pub const fn lock(&self) -> &DistributedLock {
        &self.lock
    }

    /// Raw lines of list `name`; empty when the list does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns the store error when the blob cannot be read.
    pub fn download(&self, name: &str) -> Result<Vec<String>, StoreError> {
        let Some(bytes) = self.store.get_blob(&list_blob_path(name))? else {
            return Ok(Vec::new());
        };
        Ok(String::from_utf8_lossy(&bytes)
            .lines()
            .map(ToOwned::to_owned)
            .collect())
    }

    /// Replace the content of list `name`.
    ///
    /// # Errors
    ///
    /// Returns the store error when the blob cannot be written.
    pub fn upload(&self, name: &str, lines: &[String]) -> Result<(), StoreError> {
        let mut content = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        self.store.put_blob(&list_blob_path(name), content.as_bytes())
    }

    /// Names of every list in the watchpath, sorted.
    ///
    /// # Errors
    ///
    /// Returns the store error when listing fails.
    pub fn lists(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .store
            .list_children("")?
            .into_iter()
            .filter(|entry| !entry.path.starts_with('.'))
            .filter_map(|entry| entry.path.strip_suffix(LIST_SUFFIX).map(ToOwned::to_owned))
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Lock records currently present for list `name`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the store error when listing fails.
    pub fn lock_records(&self, name: &str) -> Result<Vec<LockRecord>, StoreError> {
        self.lock.records(name)
    }

    /// Transactional access to list `name`.
    #[must_use]
    pub fn list(self: &Arc<Self>, name: impl Into<String>) -> RemoteList {
        RemoteList {
            remote: Arc::clone(self),
            name: name.into(),
        }
    }
}

/// One list of a [`RemoteStore`], mutated under the distributed lock.
#[derive(Debug, Clone)]
pub struct RemoteList {
    remote: Arc<RemoteStore>,
    name: String,
}

impl RemoteList {
    #[must_use]
    pub fn remote(&self) -> &RemoteStore {
        &self.remote
    }

    /// Run `mutate` on freshly downloaded content while holding the lock,
    /// uploading only when it reports a change.
    ///
    /// # Errors
    ///
    /// Lock or transport failure. The lock record is removed on every exit
    /// path once acquired.
    #[instrument(skip(self, cancel, mutate), fields(list = %self.name))]
    pub fn transact<F>(&self, cancel: &CancelToken, mutate: F) -> Result<bool, SyncError>
    where
        F: FnOnce(&mut Vec<CheckItem>) -> bool,
    {
        let guard = self.remote.lock.lock(&self.name, cancel)?;
        let mut items = item::decode_lines(self.remote.download(&self.name)?);
        debug!(items = items.len(), "refreshed content under lock");

        let changed = mutate(&mut items);
        if changed {
            self.remote
                .upload(&self.name, &item::encode_lines(&items))?;
            info!(items = items.len(), "uploaded list");
        } else {
            debug!("content unchanged; skipping upload");
        }
        guard.release();
        Ok(changed)
    }

    fn apply_each<F>(&self, items: &[CheckItem], cancel: &CancelToken, op: F) -> Result<(), SyncError>
    where
        F: Fn(CheckItem) -> Operation,
    {
        if items.is_empty() {
            return Ok(());
        }
        self.transact(cancel, |content| {
            items
                .iter()
                .fold(false, |changed, it| op(it.clone()).apply(content) || changed)
        })?;
        Ok(())
    }
}

impl ListRepository for RemoteList {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_content(&self) -> Result<Vec<CheckItem>, SyncError> {
        Ok(item::decode_lines(self.remote.download(&self.name)?))
    }

    fn add(&self, items: &[CheckItem], cancel: &CancelToken) -> Result<(), SyncError> {
        self.apply_each(items, cancel, Operation::Add)
    }

    fn remove(&self, items: &[CheckItem], cancel: &CancelToken) -> Result<(), SyncError> {
        self.apply_each(items, cancel, Operation::Remove)
    }

    fn toggle(&self, items: &[CheckItem], cancel: &CancelToken) -> Result<(), SyncError> {
        self.apply_each(items, cancel, Operation::Toggle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBlobStore, StoreOp};
    use std::time::Duration;

    fn setup() -> (Arc<MemoryBlobStore>, RemoteList) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store: Arc<dyn BlobStore> = blobs.clone();
        let config = LockConfig {
            retry_interval: Duration::from_millis(5),
            ..LockConfig::default()
        };
        let remote = Arc::new(RemoteStore::with_client_id(store, "me", config));
        (blobs, remote.list("groceries"))
    }

    fn raw(blobs: &MemoryBlobStore) -> String {
        let bytes = blobs
            .get_blob("groceries.list")
            .expect("readable")
            .unwrap_or_default();
        String::from_utf8(bytes).expect("utf-8")
    }

    #[test]
    fn absent_list_reads_empty() -> Result<(), SyncError> {
        let (_, list) = setup();
        assert!(list.get_content()?.is_empty());
        Ok(())
    }

    #[test]
    fn add_writes_canonical_lines() -> Result<(), SyncError> {
        let (blobs, list) = setup();
        let cancel = CancelToken::new();
        list.add(&[CheckItem::unchecked("milk"), CheckItem::new("bread", true)], &cancel)?;
        assert_eq!(raw(&blobs), "[_] milk\n[✔] bread\n");
        assert_eq!(blobs.paths(), vec!["groceries.list".to_string()]);
        Ok(())
    }

    #[test]
    fn add_is_idempotent() -> Result<(), SyncError> {
        let (blobs, list) = setup();
        let cancel = CancelToken::new();
        list.add(&[CheckItem::unchecked("milk")], &cancel)?;
        list.add(&[CheckItem::unchecked("milk")], &cancel)?;
        assert_eq!(raw(&blobs), "[_] milk\n");
        Ok(())
    }

    #[test]
    fn remove_and_toggle_of_absent_items_change_nothing() -> Result<(), SyncError> {
        let (blobs, list) = setup();
        let cancel = CancelToken::new();
        list.add(&[CheckItem::unchecked("milk")], &cancel)?;
        list.remove(&[CheckItem::unchecked("eggs")], &cancel)?;
        list.toggle(&[CheckItem::new("milk", true)], &cancel)?;
        assert_eq!(raw(&blobs), "[_] milk\n");
        Ok(())
    }

    #[test]
    fn toggle_flips_in_place() -> Result<(), SyncError> {
        let (_, list) = setup();
        let cancel = CancelToken::new();
        list.add(&[CheckItem::unchecked("a"), CheckItem::unchecked("b")], &cancel)?;
        list.toggle(&[CheckItem::unchecked("a")], &cancel)?;
        assert_eq!(
            list.get_content()?,
            vec![CheckItem::new("a", true), CheckItem::unchecked("b")]
        );
        Ok(())
    }

    #[test]
    fn malformed_lines_are_filtered_on_read() -> Result<(), SyncError> {
        let (blobs, list) = setup();
        blobs.put_blob("groceries.list", "junk\n[✔] bread\r\n\n".as_bytes())?;
        assert_eq!(list.get_content()?, vec![CheckItem::new("bread", true)]);
        Ok(())
    }

    #[test]
    fn failed_upload_releases_lock() {
        let (blobs, list) = setup();
        blobs.fail_next(StoreOp::Put);
        // The first put is the lock record itself.
        let err = list
            .add(&[CheckItem::unchecked("milk")], &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(blobs.paths().is_empty());

        blobs.fail_next(StoreOp::Get);
        let err = list
            .add(&[CheckItem::unchecked("milk")], &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportFailed);
        assert!(blobs.paths().is_empty(), "lock record must not leak");
    }

    #[test]
    fn lists_skip_lock_records_and_other_blobs() -> Result<(), StoreError> {
        let (blobs, list) = setup();
        blobs.put_blob("groceries.list", b"")?;
        blobs.put_blob("hardware.list", b"")?;
        blobs.put_blob(".groceries.lockx", b"")?;
        blobs.put_blob("notes.txt", b"")?;
        assert_eq!(
            list.remote().lists()?,
            vec!["groceries".to_string(), "hardware".to_string()]
        );
        Ok(())
    }
}
