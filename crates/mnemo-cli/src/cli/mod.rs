//! CLI command definitions for the `mnemo` binary.
//!
//! Uses clap derive macros. Store operations live under `mnemo store`; the
//! capture flow (`observe`, `capture`, `remember`, `session`) sits at the top
//! level so hooks can call it with a short command line.

pub mod capture;
pub mod migrate;
pub mod store;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use clap_complete::Shell;

use mnemo_types::config::BackendKind;
use mnemo_types::record::Category;

/// Capture and recall knowledge from long conversations.
#[derive(Parser)]
#[command(name = "mnemo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query and maintain stored records.
    Store {
        #[command(subcommand)]
        command: StoreCommand,
    },

    /// Copy every record from one backend to another.
    Migrate {
        /// Source backend.
        #[arg(long)]
        from: BackendKind,

        /// Target backend.
        #[arg(long)]
        to: BackendKind,
    },

    /// Report a session's context usage (hook entry point).
    ///
    /// Prints the capture signal as JSON when the threshold is crossed for
    /// the first time, and nothing otherwise.
    Observe {
        #[arg(long)]
        session: String,

        /// Units of context consumed.
        #[arg(long)]
        usage: u64,

        /// Context capacity.
        #[arg(long)]
        capacity: u64,
    },

    /// Distill a transcript into a record.
    Capture {
        #[arg(long)]
        session: String,

        /// Transcript file, or `-` for stdin.
        #[arg(long, default_value = "-")]
        transcript: String,

        #[arg(long)]
        category: Option<Category>,

        /// Extra tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Store a record by hand, without distillation.
    Remember {
        /// One-line summary of what to remember.
        summary: String,

        #[arg(long, default_value = "insight")]
        category: Category,

        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Manage per-session capture state.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum StoreCommand {
    /// Overview: counts per category, tags, and the most recent records.
    Summary,

    /// Full-text search, newest first.
    Search {
        /// Every whitespace-separated term must match.
        query: String,

        #[arg(long)]
        category: Option<Category>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List records, newest first.
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        category: Option<Category>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show one record.
    Show {
        id: String,

        /// Show the record as it stood at this RFC 3339 instant.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Show a record's version history.
    History { id: String },

    /// Add or remove tags.
    Tag {
        id: String,

        #[arg(long = "add")]
        add: Vec<String>,

        #[arg(long = "remove")]
        remove: Vec<String>,

        /// Fail with a conflict unless the record is at this version.
        #[arg(long)]
        expect_version: Option<u32>,
    },

    /// Records carrying a tag.
    Topic {
        tag: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Write a machine-readable snapshot as JSON.
    Export {
        /// Output file (stdout when omitted).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Restore the tags recorded at an earlier version.
    Rollback {
        id: String,

        #[arg(long)]
        to_version: u32,
    },

    /// Copy degraded records from the secondary back to the primary.
    Reconcile,
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Clear the capture flag and buffered state of a session.
    Reset { session: String },
}

/// Format a timestamp as a human-friendly relative time string.
pub fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let seconds = Utc::now().signed_duration_since(*dt).num_seconds();

    if seconds < 0 {
        return "just now".to_string();
    }
    match seconds {
        0..60 => "just now".to_string(),
        60..3600 => format!("{}m ago", seconds / 60),
        3600..86400 => format!("{}h ago", seconds / 3600),
        _ => format!("{}d ago", seconds / 86400),
    }
}

/// Truncate to `max` characters, appending `...` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_store_tag() {
        let cli = Cli::try_parse_from([
            "mnemo", "store", "tag", "r1", "--add", "rust", "--add", "async", "--remove", "old",
            "--expect-version", "2", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Store {
            command: StoreCommand::Tag { id, add, remove, expect_version },
        } = cli.command
        else {
            panic!("expected store tag");
        };
        assert_eq!(id, "r1");
        assert_eq!(add, vec!["rust", "async"]);
        assert_eq!(remove, vec!["old"]);
        assert_eq!(expect_version, Some(2));
    }

    #[test]
    fn test_parse_category_and_backend() {
        let cli = Cli::try_parse_from(["mnemo", "remember", "note", "--category", "learnings"]).unwrap();
        let Commands::Remember { category, .. } = cli.command else {
            panic!("expected remember");
        };
        assert_eq!(category, Category::Learning);

        let cli = Cli::try_parse_from(["mnemo", "migrate", "--from", "local", "--to", "remote"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Migrate { from: BackendKind::Local, to: BackendKind::Remote }
        ));

        assert!(Cli::try_parse_from(["mnemo", "remember", "x", "--category", "bogus"]).is_err());
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["mnemo", "-vv", "store", "summary"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
