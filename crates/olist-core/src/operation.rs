//! Pending list edits and the rules for collapsing them.
//!
//! Every local edit becomes an [`Operation`] in the pending queue. Before and
//! while the queue is drained, operations that target the same item text are
//! folded pairwise with [`Operation::merge`], so the remote store only sees
//! the net effect of a burst of edits.
//!
//! # Merge table
//!
//! Rows are the earlier operation `a`, columns the later operation `b`.
//! "same" means `a` and `b` carry the same checked flag.
//!
//! | a \ b  | Add                         | Remove         | Toggle             |
//! |--------|-----------------------------|----------------|--------------------|
//! | Add    | b                           | Noop           | Add(b.item.toggle()) |
//! | Remove | same ? Noop : Toggle(a)     | a              | a                  |
//! | Toggle | same ? Noop : a             | Remove(a.item) | same ? a : Noop    |
//!
//! `Noop` is the identity on either side.
//!
//! A later `Remove` after a `Toggle` wins, but is rebased onto the toggle's
//! operand: the remote still holds the pre-toggle item, so that is the one
//! to delete.
//!
//! # Invariants
//!
//! - After [`compact`], the queue holds at most one operation per item text
//!   and no `Noop`.
//! - Compaction never reorders the surviving operations relative to each
//!   other.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::item::CheckItem;

/// A not-yet-committed intent to change one list item.
///
/// The carried item is the operand of the request: for `Toggle` it is the
/// item as it was *before* toggling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Add(CheckItem),
    Remove(CheckItem),
    Toggle(CheckItem),
    Noop(CheckItem),
}

impl Operation {
    #[must_use]
    pub const fn item(&self) -> &CheckItem {
        match self {
            Self::Add(item) | Self::Remove(item) | Self::Toggle(item) | Self::Noop(item) => item,
        }
    }

    /// Grouping key for merging: the item text, ignoring the checked flag.
    #[must_use]
    pub fn text(&self) -> &str {
        self.item().text()
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        matches!(self, Self::Noop(_))
    }

    /// Combine this operation with a later one on the same item text.
    ///
    /// Both operands must share an item text; the checked flag is free to
    /// differ.
    #[must_use]
    pub fn merge(&self, next: &Self) -> Self {
        debug_assert_eq!(
            self.text(),
            next.text(),
            "merge is only defined within one item-text group"
        );

        let same_state = self.item().is_checked() == next.item().is_checked();
        match (self, next) {
            (_, Self::Noop(_)) => self.clone(),
            (Self::Noop(_), _) => next.clone(),

            (Self::Add(_), Self::Add(_)) => next.clone(),
            (Self::Add(a), Self::Remove(_)) => Self::Noop(a.clone()),
            (Self::Add(_), Self::Toggle(b)) => Self::Add(b.toggle()),

            (Self::Remove(a), Self::Add(_)) if same_state => Self::Noop(a.clone()),
            (Self::Remove(a), Self::Add(_)) => Self::Toggle(a.clone()),
            (Self::Remove(_), Self::Remove(_) | Self::Toggle(_)) => self.clone(),

            (Self::Toggle(a), Self::Add(_)) if same_state => Self::Noop(a.clone()),
            (Self::Toggle(_), Self::Add(_)) => self.clone(),
            (Self::Toggle(a), Self::Remove(_)) => Self::Remove(a.clone()),
            (Self::Toggle(_), Self::Toggle(_)) if same_state => self.clone(),
            (Self::Toggle(a), Self::Toggle(_)) => Self::Noop(a.clone()),
        }
    }

    /// Apply this operation to a list in place.
    ///
    /// Application is idempotent in the sense the remote store needs: adding
    /// a present item, removing an absent one, or toggling an absent one
    /// leaves the list unchanged. Returns whether the list changed.
    pub fn apply(&self, items: &mut Vec<CheckItem>) -> bool {
        match self {
            Self::Add(item) => {
                if items.contains(item) {
                    return false;
                }
                items.push(item.clone());
                true
            }
            Self::Remove(item) => match items.iter().position(|it| it == item) {
                Some(at) => {
                    items.remove(at);
                    true
                }
                None => false,
            },
            Self::Toggle(item) => match items.iter_mut().find(|it| *it == item) {
                Some(slot) => {
                    *slot = item.toggle();
                    true
                }
                None => false,
            },
            Self::Noop(_) => false,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add(_) => "add",
            Self::Remove(_) => "remove",
            Self::Toggle(_) => "toggle",
            Self::Noop(_) => "noop",
        };
        write!(f, "{name}({})", self.item())
    }
}

/// Apply operations in order on top of a snapshot.
#[must_use]
pub fn apply_all<'a, I>(operations: I, snapshot: &[CheckItem]) -> Vec<CheckItem>
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut items = snapshot.to_vec();
    for op in operations {
        op.apply(&mut items);
    }
    items
}

/// Fold every item-text group of a queue down to at most one operation.
///
/// Groups fold left to right. A merge result that equals the earlier
/// operation keeps the earlier slot; any other result takes the later
/// operation's slot. Cancelled groups leave nothing behind.
#[must_use]
pub fn compact(operations: Vec<Operation>) -> Vec<Operation> {
    let mut slots: Vec<Option<Operation>> = Vec::with_capacity(operations.len());
    let mut heads: HashMap<String, usize> = HashMap::new();

    for op in operations {
        if op.is_noop() {
            slots.push(None);
            continue;
        }
        let idx = slots.len();
        let text = op.text().to_owned();
        let current = heads
            .get(&text)
            .copied()
            .and_then(|at| slots.get_mut(at).and_then(Option::take).map(|cur| (at, cur)));

        let Some((at, current)) = current else {
            heads.insert(text, idx);
            slots.push(Some(op));
            continue;
        };

        let merged = current.merge(&op);
        if merged.is_noop() {
            debug!(%current, next = %op, "operations cancel out");
            heads.remove(&text);
            slots.push(None);
        } else if merged == current {
            debug!(%current, next = %op, "earlier operation absorbs later one");
            slots[at] = Some(current);
            slots.push(None);
        } else {
            debug!(%current, next = %op, %merged, "operations merged");
            heads.insert(text, idx);
            slots.push(Some(merged));
        }
    }

    slots.into_iter().flatten().collect()
}
