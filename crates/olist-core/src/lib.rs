//! olist-core: offline-first synchronization of a shared checklist.
//!
//! A client keeps an always-available local view of one list and
//! reconciles it with a list blob in a shared, dumb blob store that many
//! clients write concurrently. Serialization between clients comes from a
//! lock-record protocol built on plain create/list/delete calls.
//!
//! Layers, leaf first:
//!
//! - [`item`]: the [`CheckItem`] value and its line encoding.
//! - [`operation`]: pending edits and the rules that collapse them.
//! - [`local`]: the optimistic view plus the pending queue.
//! - [`store`]: the primitive [`BlobStore`] contract and two stores.
//! - [`lock`]: cross-client mutual exclusion over a blob store.
//! - [`remote`]: lock-guarded read-modify-write of list content.
//! - [`syncer`]: one synchronization pass.
//! - [`scheduler`]: periodic and edit-triggered passes.
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums per concern in library code, `anyhow`
//!   only for configuration loading.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`,
//!   `trace!`).

pub mod cancel;
pub mod config;
pub mod error;
pub mod item;
pub mod local;
pub mod lock;
pub mod operation;
pub mod remote;
pub mod scheduler;
pub mod store;
pub mod syncer;

pub use cancel::CancelToken;
pub use error::ErrorCode;
pub use item::CheckItem;
pub use lock::{DistributedLock, LockConfig, LockError};
pub use operation::Operation;
pub use remote::{ErrorKind, ListRepository, RemoteList, RemoteStore, SyncError};
pub use scheduler::{PassState, Scheduler};
pub use store::{BlobStore, FsBlobStore, MemoryBlobStore, StoreError};
pub use syncer::{PassReport, Syncer};
