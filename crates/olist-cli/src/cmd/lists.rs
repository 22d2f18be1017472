//! `olist lists`: names of the lists in the watchpath.

use anyhow::Result;
use olist_core::SyncError;
use serde::Serialize;
use std::io::Write;

use crate::output::{pretty_section, render_mode};
use crate::session::Session;

#[derive(Debug, Serialize)]
pub struct ListsReport {
    pub watchpath: String,
    pub lists: Vec<String>,
}

pub fn run_lists(session: &Session) -> Result<()> {
    let lists = session
        .remote
        .lists()
        .map_err(|err| session.fail(&SyncError::from(err)))?;
    let report = ListsReport {
        watchpath: session.config.watchpath.display().to_string(),
        lists,
    };
    render_mode(
        session.output,
        &report,
        |r, w| {
            for name in &r.lists {
                writeln!(w, "{name}")?;
            }
            Ok(())
        },
        |r, w| {
            pretty_section(w, &format!("Lists in {}", r.watchpath))?;
            if r.lists.is_empty() {
                writeln!(w, "(none)")?;
            }
            for name in &r.lists {
                writeln!(w, "  {name}")?;
            }
            Ok(())
        },
    )
}
