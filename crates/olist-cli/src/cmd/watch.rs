//! `olist watch`: keep the list in sync while reading edits from stdin.
//!
//! Each input line is one edit: `+ text` adds an unchecked item, `- text`
//! removes the item with that text, `x text` toggles it. Every detected
//! change is printed. End of input flushes pending edits and exits.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Args;
use olist_core::{CheckItem, PassReport, Scheduler};
use tracing::{info, warn};

use crate::cmd::show::{ListView, render_list_view};
use crate::output::{CliError, OutputMode, render_error, write_items};
use crate::session::Session;

/// How long end-of-input waits for the last edits to reach the remote.
const FLUSH_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Milliseconds between passes; defaults to `[schedule] update_interval_ms`.
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchCommand {
    Add(String),
    Remove(String),
    Toggle(String),
}

/// Parse one input line. Blank lines and unknown prefixes yield `None`.
pub fn parse_command(line: &str) -> Option<WatchCommand> {
    let (prefix, text) = line.trim_end().split_once(' ')?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let text = text.to_string();
    match prefix {
        "+" => Some(WatchCommand::Add(text)),
        "-" => Some(WatchCommand::Remove(text)),
        "x" | "X" => Some(WatchCommand::Toggle(text)),
        _ => None,
    }
}

fn shown(scheduler: &Scheduler, text: &str) -> Option<CheckItem> {
    scheduler
        .get_local()
        .into_iter()
        .find(|item| item.text() == text)
}

fn apply(scheduler: &Scheduler, command: &WatchCommand) -> bool {
    match command {
        WatchCommand::Add(text) => scheduler.add(&CheckItem::unchecked(text.clone())),
        WatchCommand::Remove(text) => shown(scheduler, text).is_some_and(|it| scheduler.remove(&it)),
        WatchCommand::Toggle(text) => shown(scheduler, text).is_some_and(|it| scheduler.toggle(&it)),
    }
}

fn print_change(mode: OutputMode, items: &[CheckItem]) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = if mode.is_json() {
        serde_json::to_string(items)
            .map_err(io::Error::other)
            .and_then(|line| writeln!(out, "{line}"))
    } else {
        writeln!(out, "--").and_then(|()| write_items(&mut out, items))
    };
    if let Err(err) = written.and_then(|()| out.flush()) {
        warn!(%err, "failed to print change");
    }
}

pub fn run_watch(args: &WatchArgs, session: &Session) -> Result<()> {
    let syncer = Arc::new(session.syncer()?);
    let mode = session.output;
    syncer.register_change_listener(move |items| print_change(mode, items));
    syncer.register_error_handler(move |err| {
        if let Err(render) = render_error(mode, &CliError::from(err)) {
            warn!(%render, "failed to print error");
        }
    });

    render_list_view(
        session,
        &ListView {
            list: session.list_name().to_string(),
            items: syncer.get_local(),
        },
    )?;

    let interval = args
        .interval_ms
        .map_or_else(|| session.config.project.schedule.update_interval(), Duration::from_millis);
    let scheduler = Scheduler::new(Arc::clone(&syncer))?;
    scheduler.set_update_timeout(interval);
    info!(list = session.list_name(), ?interval, "watching");

    for line in io::stdin().lock().lines() {
        let line = line?;
        match parse_command(&line) {
            Some(command) => {
                if !apply(&scheduler, &command) {
                    info!(?command, "edit changed nothing");
                }
            }
            None if line.trim().is_empty() => {}
            None => warn!(line, "unrecognised edit; use '+ text', '- text' or 'x text'"),
        }
    }

    scheduler.disarm();
    flush(&scheduler)
}

/// Drain what is still queued once input ends.
fn flush(scheduler: &Scheduler) -> Result<()> {
    let deadline = Instant::now() + FLUSH_DEADLINE;
    while !scheduler.syncer().pending().is_empty() {
        match scheduler.run_now() {
            PassReport::Skipped => thread::sleep(Duration::from_millis(10)),
            PassReport::Completed { .. } => {}
            PassReport::Failed { .. } => anyhow::bail!("could not flush pending edits"),
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timed out flushing pending edits");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_three_edit_prefixes() {
        assert_eq!(parse_command("+ oat milk"), Some(WatchCommand::Add("oat milk".into())));
        assert_eq!(parse_command("- bread"), Some(WatchCommand::Remove("bread".into())));
        assert_eq!(parse_command("x eggs\n"), Some(WatchCommand::Toggle("eggs".into())));
    }

    #[test]
    fn rejects_blank_and_unknown_lines() {
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("+ "), None);
        assert_eq!(parse_command("* milk"), None);
        assert_eq!(parse_command("milk"), None);
    }
}
