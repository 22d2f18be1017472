//! `olist sync`: run one pass and report what it saw.

use anyhow::Result;
use olist_core::{CheckItem, ErrorCode, PassReport, Syncer};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

use crate::output::{CliError, pretty_kv, pretty_section, render_mode, write_items};
use crate::session::{LastError, Session};

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub list: String,
    pub client: String,
    pub items: Vec<CheckItem>,
}

pub fn run_sync(session: &Session) -> Result<()> {
    let syncer = Syncer::new(Arc::new(session.list()));
    let last_error = LastError::default();
    last_error.attach(&syncer);

    if let PassReport::Failed { .. } | PassReport::Skipped = syncer.run_once() {
        let err = last_error
            .take()
            .unwrap_or_else(|| CliError::from(ErrorCode::InternalUnexpected));
        return Err(session.fail_with(err));
    }

    let report = SyncReport {
        list: session.list_name().to_string(),
        client: session.remote.client_id().to_string(),
        items: syncer.get_local(),
    };
    render_mode(
        session.output,
        &report,
        |r, w| write_items(w, &r.items),
        |r, w| {
            pretty_section(w, &format!("Synced {}", r.list))?;
            pretty_kv(w, "client", &r.client)?;
            pretty_kv(w, "items", r.items.len().to_string())?;
            writeln!(w)?;
            write_items(w, &r.items)
        },
    )
}
