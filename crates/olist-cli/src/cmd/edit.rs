//! `olist add`, `olist remove`, `olist toggle`: one local edit, then one pass.

use anyhow::Result;
use clap::Args;
use olist_core::{CheckItem, ErrorCode, Operation, PassReport};
use serde::Serialize;
use std::io::Write;

use crate::output::{CliError, pretty_kv, pretty_section, render_mode, write_items};
use crate::session::{LastError, Session};

#[derive(Args, Debug)]
pub struct ItemArgs {
    /// Item text.
    pub text: String,

    /// The item is (for add: will be) checked.
    #[arg(long)]
    pub checked: bool,
}

impl ItemArgs {
    pub fn item(&self) -> CheckItem {
        CheckItem::new(self.text.clone(), self.checked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Add,
    Remove,
    Toggle,
}

impl EditKind {
    fn operation(self, item: CheckItem) -> Operation {
        match self {
            Self::Add => Operation::Add(item),
            Self::Remove => Operation::Remove(item),
            Self::Toggle => Operation::Toggle(item),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EditReport {
    pub list: String,
    pub operation: String,
    /// Whether the edit changed the list. Adding a present item, or
    /// removing or toggling an absent one, changes nothing.
    pub changed: bool,
    pub committed: usize,
    pub items: Vec<CheckItem>,
}

pub fn run_edit(kind: EditKind, args: &ItemArgs, session: &Session) -> Result<()> {
    let syncer = session.syncer()?;
    let last_error = LastError::default();
    last_error.attach(&syncer);

    let item = args.item();
    let changed = match kind {
        EditKind::Add => syncer.add(&item),
        EditKind::Remove => syncer.remove(&item),
        EditKind::Toggle => syncer.toggle(&item),
    };

    let committed = if changed {
        match syncer.run_once() {
            PassReport::Completed { committed, .. } => committed,
            PassReport::Failed { .. } | PassReport::Skipped => {
                let err = last_error
                    .take()
                    .unwrap_or_else(|| CliError::from(ErrorCode::InternalUnexpected));
                return Err(session.fail_with(err));
            }
        }
    } else {
        0
    };

    let report = EditReport {
        list: session.list_name().to_string(),
        operation: kind.operation(item).to_string(),
        changed,
        committed,
        items: syncer.get_local(),
    };
    render_mode(
        session.output,
        &report,
        |r, w| {
            if !r.changed {
                writeln!(w, "unchanged: {}", r.operation)?;
            }
            write_items(w, &r.items)
        },
        |r, w| {
            pretty_section(w, &format!("List {}", r.list))?;
            pretty_kv(w, "operation", &r.operation)?;
            pretty_kv(w, "changed", if r.changed { "yes" } else { "no (nothing to do)" })?;
            pretty_kv(w, "items", r.items.len().to_string())?;
            writeln!(w)?;
            write_items(w, &r.items)
        },
    )
}
