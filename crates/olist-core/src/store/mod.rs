//! Primitive blob storage underneath the list synchronization engine.
//!
//! The remote side of a list is a dumb blob store: whole-blob reads and
//! writes, deletes, and a listing that carries store-assigned modification
//! times. Nothing here offers transactions; the distributed lock in
//! [`crate::lock`] and the read-modify-write in [`crate::remote`] are built
//! from these four calls alone.
//!
//! Blob paths are flat names relative to the store root (the watchpath),
//! e.g. `groceries.list` or `.groceries.lock3f9a0c1d2b4e5f60`.

use std::fmt;
use std::io;
use std::time::SystemTime;

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

/// The primitive a failed store call was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Delete,
    List,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::List => "list",
        })
    }
}

/// Transport-level failure talking to a blob store.
#[derive(Debug, thiserror::Error)]
#[error("blob store {op} failed for {path:?}: {source}")]
pub struct StoreError {
    pub op: StoreOp,
    pub path: String,
    #[source]
    pub source: io::Error,
}

impl StoreError {
    pub fn new(op: StoreOp, path: impl Into<String>, source: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            source,
        }
    }
}

/// One child of the store root as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub path: String,
    pub modified: SystemTime,
}

/// Whole-blob storage with store-assigned modification times.
///
/// Implementations must be safe to share between threads; the sync engine
/// calls them from its remote-commit worker while other threads read.
pub trait BlobStore: Send + Sync {
    /// Read a blob. `Ok(None)` when it does not exist.
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Create or fully replace a blob, refreshing its modification time.
    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Delete a blob. Deleting an absent blob succeeds.
    fn delete_blob(&self, path: &str) -> Result<(), StoreError>;

    /// List the blobs whose path starts with `prefix`.
    fn list_children(&self, prefix: &str) -> Result<Vec<BlobEntry>, StoreError>;
}
