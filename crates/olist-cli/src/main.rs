#![forbid(unsafe_code)]

mod cmd;
mod output;
mod session;

use clap::{CommandFactory, Parser, Subcommand};
use cmd::edit::EditKind;
use olist_core::config::CliOverrides;
use session::Session;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "olist: shared checklists that work offline",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Root directory of the shared store (overrides config and `OLIST_WATCHPATH`).
    #[arg(long, global = true)]
    watchpath: Option<PathBuf>,

    /// List to operate on (overrides config and `OLIST_LIST`).
    #[arg(short, long, global = true)]
    list: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            json: self.json,
            watchpath: self.watchpath.clone(),
            list: self.list.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Edit",
        about = "Add an item",
        after_help = "EXAMPLES:\n    # Add an unchecked item\n    olist add \"oat milk\"\n\n    # Add an item that is already done\n    olist add bread --checked"
    )]
    Add(cmd::edit::ItemArgs),

    #[command(
        next_help_heading = "Edit",
        about = "Remove an item",
        after_help = "EXAMPLES:\n    # Remove an unchecked item\n    olist remove milk\n\n    # Remove a checked item\n    olist remove bread --checked"
    )]
    Remove(cmd::edit::ItemArgs),

    #[command(
        next_help_heading = "Edit",
        about = "Toggle an item",
        long_about = "Flip an item's checked state. Name the item in its current state.",
        after_help = "EXAMPLES:\n    # Check off milk\n    olist toggle milk\n\n    # Uncheck bread again\n    olist toggle bread --checked"
    )]
    Toggle(cmd::edit::ItemArgs),

    #[command(
        next_help_heading = "Read",
        about = "Show the list",
        after_help = "EXAMPLES:\n    olist show\n    olist show --list hardware --json"
    )]
    Show,

    #[command(
        next_help_heading = "Read",
        about = "List the lists in the watchpath"
    )]
    Lists,

    #[command(
        next_help_heading = "Read",
        about = "Show lock records of the list",
        long_about = "Show lock records of the list, oldest first. The oldest live record holds the lock."
    )]
    Locks,

    #[command(
        next_help_heading = "Sync",
        about = "Run one sync pass",
        after_help = "EXAMPLES:\n    olist sync --watchpath /mnt/shared/lists"
    )]
    Sync,

    #[command(
        next_help_heading = "Sync",
        about = "Sync continuously, reading edits from stdin",
        long_about = "Keep the list in sync and print every change. Each stdin line is an edit: '+ text' adds, '- text' removes, 'x text' toggles. End of input flushes pending edits.",
        after_help = "EXAMPLES:\n    # Sync every 5 seconds\n    olist watch --interval-ms 5000\n\n    # Scripted edits\n    printf '+ milk\\nx milk\\n' | olist watch"
    )]
    Watch(cmd::watch::WatchArgs),

    #[command(
        next_help_heading = "Project Maintenance",
        about = "Generate shell completion scripts",
        after_help = "EXAMPLES:\n    olist completions bash\n    olist completions zsh"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("OLIST_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "olist=debug,info"
        } else {
            "olist=info,warn"
        })
    });

    let format = env::var("OLIST_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args.shell, &mut command);
    }

    let project_root = env::current_dir()?;
    let session = Session::open(&project_root, &cli.overrides())?;

    match &cli.command {
        Commands::Add(args) => cmd::edit::run_edit(EditKind::Add, args, &session),
        Commands::Remove(args) => cmd::edit::run_edit(EditKind::Remove, args, &session),
        Commands::Toggle(args) => cmd::edit::run_edit(EditKind::Toggle, args, &session),
        Commands::Show => cmd::show::run_show(&session),
        Commands::Lists => cmd::lists::run_lists(&session),
        Commands::Locks => cmd::locks::run_locks(&session),
        Commands::Sync => cmd::sync::run_sync(&session),
        Commands::Watch(args) => cmd::watch::run_watch(args, &session),
        Commands::Completions(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_parses_after_subcommand() {
        let cli = Cli::parse_from(["olist", "show", "--json"]);
        assert!(cli.json);
        assert!(cli.overrides().json);
    }

    #[test]
    fn list_and_watchpath_are_global() {
        let cli = Cli::parse_from(["olist", "add", "milk", "-l", "groceries", "--watchpath", "/tmp/x"]);
        let overrides = cli.overrides();
        assert_eq!(overrides.list.as_deref(), Some("groceries"));
        assert_eq!(overrides.watchpath, Some(PathBuf::from("/tmp/x")));
    }

    #[test]
    fn edit_subcommands_take_text_and_checked() {
        let cli = Cli::parse_from(["olist", "toggle", "bread", "--checked"]);
        match cli.command {
            Commands::Toggle(args) => {
                assert_eq!(args.text, "bread");
                assert!(args.checked);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn watch_interval_is_optional() {
        let cli = Cli::parse_from(["olist", "watch"]);
        assert!(matches!(
            cli.command,
            Commands::Watch(cmd::watch::WatchArgs { interval_ms: None })
        ));
        let cli = Cli::parse_from(["olist", "watch", "--interval-ms", "250"]);
        assert!(matches!(
            cli.command,
            Commands::Watch(cmd::watch::WatchArgs {
                interval_ms: Some(250)
            })
        ));
    }

    #[test]
    fn all_subcommands_parse() {
        let subcommands = [
            vec!["olist", "add", "x"],
            vec!["olist", "remove", "x"],
            vec!["olist", "toggle", "x"],
            vec!["olist", "show"],
            vec!["olist", "lists"],
            vec!["olist", "locks"],
            vec!["olist", "sync"],
            vec!["olist", "watch"],
            vec!["olist", "completions", "bash"],
        ];
        for args in &subcommands {
            let result = Cli::try_parse_from(args.iter());
            assert!(result.is_ok(), "failed to parse {args:?}: {:?}", result.err());
        }
    }

    #[test]
    fn clap_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
