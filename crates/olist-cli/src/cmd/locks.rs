//! `olist locks`: lock records currently present for the list.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use olist_core::SyncError;
use olist_core::lock::LockRecord;
use serde::Serialize;
use std::io::Write;

use crate::output::{pretty_section, render_mode};
use crate::session::Session;

#[derive(Debug, Serialize)]
pub struct LockRow {
    pub owner: String,
    pub modified: String,
    pub age_ms: u128,
    /// Whether the next contender will evict it.
    pub stale: bool,
    /// Whether this client would hold the lock now.
    pub holder: bool,
}

#[derive(Debug, Serialize)]
pub struct LocksReport {
    pub list: String,
    pub records: Vec<LockRow>,
}

fn to_rows(records: Vec<LockRecord>, stale_after_ms: u128) -> Vec<LockRow> {
    let mut holder_found = false;
    records
        .into_iter()
        .map(|record| {
            let age_ms = record.age().as_millis();
            let stale = age_ms > stale_after_ms;
            let holder = !stale && !holder_found;
            holder_found |= holder;
            LockRow {
                owner: record.owner,
                modified: DateTime::<Utc>::from(record.modified)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
                age_ms,
                stale,
                holder,
            }
        })
        .collect()
}

pub fn run_locks(session: &Session) -> Result<()> {
    let records = session
        .remote
        .lock_records(session.list_name())
        .map_err(|err| session.fail(&SyncError::from(err)))?;
    let stale_after_ms = u128::from(session.config.project.lock.stale_after_ms);
    let report = LocksReport {
        list: session.list_name().to_string(),
        records: to_rows(records, stale_after_ms),
    };

    render_mode(
        session.output,
        &report,
        |r, w| {
            for row in &r.records {
                writeln!(w, "{}  {}  {}ms", row.owner, row.modified, row.age_ms)?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, &format!("Lock records for {}", r.list))?;
            if r.records.is_empty() {
                writeln!(w, "(unlocked)")?;
            }
            for row in &r.records {
                let note = if row.holder {
                    " holder"
                } else if row.stale {
                    " stale"
                } else {
                    " waiting"
                };
                writeln!(w, "  {}  {:>8}ms{note}", row.owner, row.age_ms)?;
            }
            Ok(())
        },
    )
}
