//! The client's optimistic view of the list and its pending edits.
//!
//! # Invariants
//!
//! - `view == apply_all(pending, last_remote)` after every local edit and
//!   after every reconciliation.
//! - Locks are always taken in the order queue → view → last remote, and
//!   every read-modify-write happens inside one critical section.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::item::CheckItem;
use crate::operation::{self, Operation};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts before and after one compaction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Default)]
pub struct LocalState {
    queue: Mutex<VecDeque<Operation>>,
    view: Mutex<Vec<CheckItem>>,
    last_remote: Mutex<Vec<CheckItem>>,
}

impl LocalState {
    /// Start from a known remote snapshot with nothing pending.
    #[must_use]
    pub fn new(snapshot: Vec<CheckItem>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            view: Mutex::new(snapshot.clone()),
            last_remote: Mutex::new(snapshot),
        }
    }

    /// Add `item` unless an identical item is already shown.
    pub fn add(&self, item: &CheckItem) -> bool {
        self.edit(Operation::Add(item.clone()))
    }

    /// Remove `item` if it is shown.
    pub fn remove(&self, item: &CheckItem) -> bool {
        self.edit(Operation::Remove(item.clone()))
    }

    /// Replace `item` with its toggled value if it is shown.
    pub fn toggle(&self, item: &CheckItem) -> bool {
        self.edit(Operation::Toggle(item.clone()))
    }

    /// Apply `op` to the view and enqueue it, in one critical section.
    /// Edits that would not change the view are dropped.
    fn edit(&self, op: Operation) -> bool {
        let mut queue = locked(&self.queue);
        let mut view = locked(&self.view);
        if !op.apply(&mut view) {
            return false;
        }
        queue.push_back(op);
        true
    }

    /// Current optimistic view.
    #[must_use]
    pub fn view(&self) -> Vec<CheckItem> {
        locked(&self.view).clone()
    }

    /// Operations still waiting for a remote commit, in queue order.
    #[must_use]
    pub fn pending(&self) -> Vec<Operation> {
        locked(&self.queue).iter().cloned().collect()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !locked(&self.queue).is_empty()
    }

    /// The snapshot the view was last reconciled against.
    #[must_use]
    pub fn last_remote(&self) -> Vec<CheckItem> {
        locked(&self.last_remote).clone()
    }

    pub fn pop_pending(&self) -> Option<Operation> {
        locked(&self.queue).pop_front()
    }

    /// Put an operation whose commit failed back at the head of the queue.
    pub fn requeue_front(&self, op: Operation) {
        locked(&self.queue).push_front(op);
    }

    /// Compact the pending queue and swap the result in.
    pub fn compact_pending(&self) -> Compaction {
        let mut queue = locked(&self.queue);
        let before = queue.len();
        let compacted = operation::compact(queue.drain(..).collect());
        queue.extend(compacted);
        Compaction {
            before,
            after: queue.len(),
        }
    }

    /// Rebase the view on a fresh remote snapshot.
    ///
    /// Returns the new view when it differs from the old one.
    pub fn reconcile(&self, snapshot: Vec<CheckItem>) -> Option<Vec<CheckItem>> {
        let queue = locked(&self.queue);
        let rebased = operation::apply_all(queue.iter(), &snapshot);
        let mut view = locked(&self.view);
        *locked(&self.last_remote) = snapshot;
        if *view == rebased {
            return None;
        }
        view.clone_from(&rebased);
        Some(rebased)
    }
}
