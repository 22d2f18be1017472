//! One synchronization pass between the local view and the remote list.
//!
//! A pass moves through three phases:
//!
//! 1. **Draining.** The pending queue is compacted, then operations are
//!    popped one at a time. For each popped operation two scoped threads
//!    run side by side: one commits the operation to the remote list, the
//!    other compacts whatever is still queued (including edits made since
//!    the pass started). Both are joined before the next pop.
//! 2. **Reconciling.** The remote snapshot is fetched and the view is
//!    rebuilt as `apply_all(pending, snapshot)`. Listeners hear about it
//!    only when the view actually changed.
//! 3. **Idle.**
//!
//! A failed commit puts its operation back at the head of the queue and
//! ends the pass, so every operation is committed at least once.

use std::panic;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{Span, debug, error, info, info_span};

use crate::cancel::CancelToken;
use crate::item::CheckItem;
use crate::local::LocalState;
use crate::operation::Operation;
use crate::remote::{ErrorKind, ListRepository, SyncError};

/// Observer of view changes detected during a pass.
pub type ChangeListener = Arc<dyn Fn(&[CheckItem]) + Send + Sync>;

/// Observer of remote failures.
pub type ErrorHandler = Arc<dyn Fn(&SyncError) + Send + Sync>;

/// Outcome of one [`Syncer::run_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReport {
    /// Another pass was already running; nothing was done.
    Skipped,
    /// The queue drained and the view was reconciled.
    Completed { committed: usize, changed: bool },
    /// The pass stopped at an error after `committed` commits.
    Failed { committed: usize, kind: ErrorKind },
}

/// Optimistic local list kept in sync with one remote list.
pub struct Syncer {
    remote: Arc<dyn ListRepository>,
    local: LocalState,
    listeners: Mutex<Vec<ChangeListener>>,
    handlers: Mutex<Vec<ErrorHandler>>,
}

impl std::fmt::Debug for Syncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syncer")
            .field("list", &self.remote.name())
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl Syncer {
    /// Start with an empty local view.
    pub fn new(remote: Arc<dyn ListRepository>) -> Self {
        Self::with_local(Vec::new(), remote)
    }

    /// Start from a previously known snapshot of the remote list.
    pub fn with_local(snapshot: Vec<CheckItem>, remote: Arc<dyn ListRepository>) -> Self {
        Self {
            remote,
            local: LocalState::new(snapshot),
            listeners: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn list_name(&self) -> &str {
        self.remote.name()
    }

    /// Optimistically add `item`. Returns `false` if it was already shown.
    pub fn add(&self, item: &CheckItem) -> bool {
        let added = self.local.add(item);
        debug!(%item, added, "local add");
        added
    }

    /// Optimistically remove `item`. Returns `false` if it was not shown.
    pub fn remove(&self, item: &CheckItem) -> bool {
        let removed = self.local.remove(item);
        debug!(%item, removed, "local remove");
        removed
    }

    /// Optimistically toggle `item`, given in its current state. Returns
    /// `false` if it was not shown.
    pub fn toggle(&self, item: &CheckItem) -> bool {
        let toggled = self.local.toggle(item);
        debug!(%item, toggled, "local toggle");
        toggled
    }

    /// The current optimistic view.
    #[must_use]
    pub fn get_local(&self) -> Vec<CheckItem> {
        self.local.view()
    }

    /// Edits not yet committed remotely.
    #[must_use]
    pub fn pending(&self) -> Vec<Operation> {
        self.local.pending()
    }

    /// The remote snapshot the view was last reconciled against.
    #[must_use]
    pub fn last_remote(&self) -> Vec<CheckItem> {
        self.local.last_remote()
    }

    pub fn register_change_listener<F>(&self, listener: F)
    where
        F: Fn(&[CheckItem]) + Send + Sync + 'static,
    {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub fn register_error_handler<F>(&self, handler: F)
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Run one pass that cannot be cancelled.
    pub fn run_once(&self) -> PassReport {
        self.run_once_with(&CancelToken::new())
    }

    /// Run one pass. `cancel` interrupts a pending lock wait.
    ///
    /// Callers must not run two passes of the same syncer concurrently;
    /// [`crate::scheduler::Scheduler`] enforces that.
    pub fn run_once_with(&self, cancel: &CancelToken) -> PassReport {
        let span = info_span!("sync_pass", list = %self.remote.name());
        let _entered = span.enter();

        let initial = self.local.compact_pending();
        debug!(
            before = initial.before,
            after = initial.after,
            "draining pending operations"
        );

        let mut committed = 0;
        while let Some(op) = self.local.pop_pending() {
            if let Err(err) = self.commit_while_compacting(&op, cancel) {
                info!(%op, "commit failed; operation kept for the next pass");
                self.local.requeue_front(op);
                let kind = err.kind();
                self.notify_error(&err);
                return PassReport::Failed { committed, kind };
            }
            committed += 1;
        }

        debug!(committed, "queue drained; reconciling");
        let snapshot = match self.remote.get_content() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let kind = err.kind();
                self.notify_error(&err);
                return PassReport::Failed { committed, kind };
            }
        };

        let changed = match self.local.reconcile(snapshot) {
            Some(view) => {
                info!(items = view.len(), "change detected");
                self.notify_changed(&view);
                true
            }
            None => false,
        };

        PassReport::Completed { committed, changed }
    }

    fn commit_while_compacting(&self, op: &Operation, cancel: &CancelToken) -> Result<(), SyncError> {
        let span = Span::current();
        thread::scope(|scope| {
            let commit_span = span.clone();
            let commit = scope.spawn(move || {
                commit_span.in_scope(|| {
                    debug!(%op, "committing");
                    self.remote.perform(op, cancel)
                })
            });
            let compact = scope.spawn(move || span.in_scope(|| self.local.compact_pending()));

            let stats = compact
                .join()
                .unwrap_or_else(|payload| panic::resume_unwind(payload));
            if stats.before != stats.after {
                debug!(before = stats.before, after = stats.after, "compacted remaining queue");
            }
            commit
                .join()
                .unwrap_or_else(|payload| panic::resume_unwind(payload))
        })
    }

    fn notify_changed(&self, view: &[CheckItem]) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(view);
        }
    }

    fn notify_error(&self, err: &SyncError) {
        error!(code = %err.code(), error = %err, "sync pass failed");
        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(err);
        }
    }
}
