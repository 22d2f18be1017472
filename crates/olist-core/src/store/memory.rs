use std::collections::{BTreeMap, HashSet};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use super::{BlobEntry, BlobStore, StoreError, StoreOp};

#[derive(Debug, Clone)]
struct Blob {
    bytes: Vec<u8>,
    modified: SystemTime,
}

#[derive(Debug, Default)]
struct Inner {
    blobs: BTreeMap<String, Blob>,
    last_stamp: Option<SystemTime>,
    failing: HashSet<StoreOp>,
}

impl Inner {
    /// Store-assigned timestamps are strictly increasing so listings order
    /// writes the way they happened.
    fn next_stamp(&mut self) -> SystemTime {
        let now = SystemTime::now();
        let stamp = match self.last_stamp {
            Some(last) if now <= last => last + Duration::from_micros(1),
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn injected(&mut self, op: StoreOp, path: &str) -> Result<(), StoreError> {
        if self.failing.remove(&op) {
            return Err(StoreError::new(
                op,
                path,
                io::Error::new(io::ErrorKind::ConnectionReset, "injected transport failure"),
            ));
        }
        Ok(())
    }
}

/// In-process blob store shared by every client holding a reference.
///
/// Used by tests and the simulator as the shared remote. Offers two hooks a
/// real server does not: [`backdate`](Self::backdate) to age a blob, and
/// [`fail_next`](Self::fail_next) to inject a transport failure.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    inner: Mutex<Inner>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a blob's modification time `age` into the past.
    ///
    /// Returns `false` when the blob does not exist.
    pub fn backdate(&self, path: &str, age: Duration) -> bool {
        let mut inner = self.inner();
        match inner.blobs.get_mut(path) {
            Some(blob) => {
                blob.modified = blob.modified.checked_sub(age).unwrap_or(SystemTime::UNIX_EPOCH);
                true
            }
            None => false,
        }
    }

    /// Make the next call of `op` fail with a transport error.
    pub fn fail_next(&self, op: StoreOp) {
        self.inner().failing.insert(op);
    }

    /// Names of all stored blobs, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.inner().blobs.keys().cloned().collect()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut inner = self.inner();
        inner.injected(StoreOp::Get, path)?;
        Ok(inner.blobs.get(path).map(|blob| blob.bytes.clone()))
    }

    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner();
        inner.injected(StoreOp::Put, path)?;
        let modified = inner.next_stamp();
        inner.blobs.insert(
            path.to_owned(),
            Blob {
                bytes: bytes.to_vec(),
                modified,
            },
        );
        Ok(())
    }

    fn delete_blob(&self, path: &str) -> Result<(), StoreError> {
        let mut inner = self.inner();
        inner.injected(StoreOp::Delete, path)?;
        inner.blobs.remove(path);
        Ok(())
    }

    fn list_children(&self, prefix: &str) -> Result<Vec<BlobEntry>, StoreError> {
        let mut inner = self.inner();
        inner.injected(StoreOp::List, prefix)?;
        Ok(inner
            .blobs
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, blob)| BlobEntry {
                path: path.clone(),
                modified: blob.modified,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_roundtrips_bytes() -> Result<(), StoreError> {
        let store = MemoryBlobStore::new();
        store.put_blob("a.list", b"[_] milk\n")?;
        assert_eq!(store.get_blob("a.list")?, Some(b"[_] milk\n".to_vec()));
        assert_eq!(store.get_blob("missing")?, None);
        Ok(())
    }

    #[test]
    fn timestamps_strictly_increase() -> Result<(), StoreError> {
        let store = MemoryBlobStore::new();
        store.put_blob("x1", b"")?;
        store.put_blob("x2", b"")?;
        let entries = store.list_children("x")?;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].modified < entries[1].modified);
        Ok(())
    }

    #[test]
    fn list_filters_by_prefix() -> Result<(), StoreError> {
        let store = MemoryBlobStore::new();
        store.put_blob(".a.lock1", b"")?;
        store.put_blob("a.list", b"")?;
        let entries = store.list_children(".a.lock")?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, ".a.lock1");
        Ok(())
    }

    #[test]
    fn delete_of_absent_blob_succeeds() {
        let store = MemoryBlobStore::new();
        assert!(store.delete_blob("nothing").is_ok());
    }

    #[test]
    fn injected_failure_fires_once() {
        let store = MemoryBlobStore::new();
        store.fail_next(StoreOp::Get);
        let err = store.get_blob("a.list").unwrap_err();
        assert_eq!(err.op, StoreOp::Get);
        assert!(store.get_blob("a.list").is_ok());
    }

    #[test]
    fn backdate_ages_an_existing_blob() -> Result<(), StoreError> {
        let store = MemoryBlobStore::new();
        store.put_blob("old", b"")?;
        assert!(store.backdate("old", Duration::from_secs(60)));
        assert!(!store.backdate("missing", Duration::from_secs(60)));
        let entry = &store.list_children("old")?[0];
        assert!(entry.modified.elapsed().unwrap_or_default() >= Duration::from_secs(59));
        Ok(())
    }
}
