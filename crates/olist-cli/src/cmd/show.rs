//! `olist show`: print the remote content of the list.

use anyhow::Result;
use olist_core::{CheckItem, ListRepository};
use serde::Serialize;
use std::io::Write;

use crate::output::{pretty_section, render_mode, write_items};
use crate::session::Session;

#[derive(Debug, Serialize)]
pub struct ListView {
    pub list: String,
    pub items: Vec<CheckItem>,
}

pub fn run_show(session: &Session) -> Result<()> {
    let items = session.list().get_content().map_err(|err| session.fail(&err))?;
    let view = ListView {
        list: session.list_name().to_string(),
        items,
    };
    render_list_view(session, &view)
}

pub fn render_list_view(session: &Session, view: &ListView) -> Result<()> {
    render_mode(
        session.output,
        view,
        |v, w| write_items(w, &v.items),
        |v, w| {
            let done = v.items.iter().filter(|it| it.is_checked()).count();
            pretty_section(w, &format!("{} ({done}/{} done)", v.list, v.items.len()))?;
            if v.items.is_empty() {
                writeln!(w, "(empty)")?;
            }
            write_items(w, &v.items)
        },
    )
}
