// ABOUTME: Entry point for the stagelog binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and queries a SQLite journal database.

use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use stagelog_core::crash::{CrashMonitoring, CrashReport};
use stagelog_core::entry::{Entry, EntryMonitoring};
use stagelog_core::{StagelogConfig, TypeRegistry};
use stagelog_store::{Database, Direction, JournalStore, SqliteDatabase, StoreError};

#[derive(Parser)]
#[command(name = "stagelog")]
#[command(about = "Inspect stagelog journal entries and crash reports")]
#[command(version)]
struct Cli {
    /// Journal database (defaults to $STAGELOG_HOME/journal.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// List entries started in a time window and save a cursor for the rest
    List {
        /// Window start, RFC 3339 (defaults to 24 hours ago)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Window end, RFC 3339, inclusive (defaults to now)
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Only entries from these services (repeatable, case-insensitive)
        #[arg(long)]
        service: Vec<String>,

        /// Page size
        #[arg(long, default_value_t = 20)]
        page: usize,

        /// Oldest first instead of most recent first
        #[arg(long)]
        ascending: bool,
    },

    /// Fetch the next page of a saved cursor
    Next {
        /// Cursor id printed by `list`
        cursor: String,

        /// Page size (defaults to the cursor's own)
        #[arg(long)]
        page: Option<usize>,

        /// Replace the cursor's service filter
        #[arg(long)]
        service: Vec<String>,
    },

    /// Show one entry
    Show {
        id: String,

        /// Load crash reports referenced by the entry
        #[arg(long)]
        crash: bool,
    },

    /// List entries referencing an entity, most recent first
    Entity {
        /// Numeric entity type
        #[arg(allow_negative_numbers = true)]
        entity_type: i32,

        entity_id: String,
    },

    /// Query crash reports
    Crashes {
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Crash code (case-insensitive)
        #[arg(long)]
        code: Option<String>,

        /// Treat --code as a prefix
        #[arg(long, requires = "code")]
        prefix: bool,
    },

    /// Delete entries (absent ids are ignored)
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("stagelog=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = StagelogConfig::from_env()?;
    let path = cli.db.unwrap_or_else(|| config.database_path());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let db = SqliteDatabase::open(&path).with_context(|| format!("opening {}", path.display()))?;
    let store = JournalStore::from_config(&config);
    let out = Output {
        format: cli.format,
        types: TypeRegistry::new(),
    };

    tracing::debug!(db = %path.display(), service = %config.service, "stagelog starting");

    match cli.command {
        Commands::List {
            from,
            to,
            service,
            page,
            ascending,
        } => {
            let (from, to) = window(from, to);
            let services: Vec<&str> = service.iter().map(String::as_str).collect();

            let (cursor, entries, exhausted) = db.with_tx(|tx| -> Result<_, StoreError> {
                let direction = if ascending {
                    Direction::Forward
                } else {
                    Direction::Reverse
                };
                let mut cursor = store.by_date_sorted(tx, from, to, page, direction, &services)?;
                let entries = cursor.next_page(tx, 0, &services)?;
                Ok((cursor.id(), entries, cursor.is_empty()))
            })?;

            out.entries(&entries, Some(&cursor), exhausted)
        }

        Commands::Next {
            cursor,
            page,
            service,
        } => {
            let services: Vec<&str> = service.iter().map(String::as_str).collect();

            let (entries, exhausted) = db.with_tx(|tx| -> Result<_, StoreError> {
                let mut saved = store.cursor(tx, &cursor)?;
                let entries = saved.next_page(tx, page.unwrap_or(0), &services)?;
                Ok((entries, saved.is_empty()))
            })?;

            out.entries(&entries, Some(&cursor), exhausted)
        }

        Commands::Show { id, crash } => {
            let entry = db.with_tx(|tx| {
                if crash {
                    store.by_id_with_crash(tx, &id)
                } else {
                    store.by_id(tx, &id)
                }
            })?;

            out.entries(std::slice::from_ref(&entry), None, true)
        }

        Commands::Entity {
            entity_type,
            entity_id,
        } => {
            let entries = db.with_tx(|tx| store.by_entity(tx, entity_type, &entity_id))?;
            out.entries(&entries, None, true)
        }

        Commands::Crashes {
            from,
            to,
            code,
            prefix,
        } => {
            let (from, to) = window(from, to);
            let crashes = store.crashes();

            let reports = db.with_tx(|tx| match code.as_deref() {
                Some(code) if prefix => crashes.by_code_prefix(tx, code, from, to),
                Some(code) => crashes.by_date_code(tx, from, to, code),
                None => crashes.by_date_code(tx, from, to, ""),
            })?;

            out.reports(&reports)
        }

        Commands::Delete { ids } => {
            db.with_tx(|tx| store.delete(tx, &ids))?;
            tracing::info!(count = ids.len(), "deleted journal entries");
            Ok(())
        }
    }
}

/// Defaults an open window to the last 24 hours.
fn window(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> (DateTime<Utc>, DateTime<Utc>) {
    let to = to.unwrap_or_else(Utc::now);
    let from = from.unwrap_or_else(|| to - Duration::days(1));
    (from, to)
}

#[derive(Serialize)]
struct EntryPage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<&'a str>,
    exhausted: bool,
    entries: Vec<EntryMonitoring>,
}

struct Output {
    format: Format,
    types: TypeRegistry,
}

impl Output {
    fn entries(&self, entries: &[Entry], cursor: Option<&str>, exhausted: bool) -> anyhow::Result<()> {
        let page = EntryPage {
            cursor,
            exhausted,
            entries: entries.iter().map(|e| e.monitoring(&self.types)).collect(),
        };

        self.print(&page, || {
            let mut text: Vec<String> = entries.iter().map(|e| e.render(&self.types)).collect();
            match cursor {
                Some(id) if !exhausted => text.push(format!("cursor: {}", id)),
                Some(_) => text.push("cursor exhausted".to_string()),
                None => {}
            }
            text.join("\n\n")
        })
    }

    fn reports(&self, reports: &[CrashReport]) -> anyhow::Result<()> {
        let views: Vec<CrashMonitoring> = reports.iter().map(CrashReport::monitoring).collect();

        self.print(&views, || {
            reports
                .iter()
                .map(|r| format!("{} {} {}\n{:#}", r.id, r.code, r.created.to_rfc3339(), r))
                .collect::<Vec<_>>()
                .join("\n\n")
        })
    }

    fn print<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
        let rendered = match self.format {
            Format::Text => text(),
            Format::Json => serde_json::to_string_pretty(value)?,
            Format::Yaml => serde_yaml::to_string(value)?,
        };

        if !rendered.is_empty() {
            println!("{}", rendered.trim_end());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_parses_window_and_services() {
        let cli = Cli::try_parse_from([
            "stagelog",
            "--format",
            "json",
            "list",
            "--from",
            "2026-03-01T00:00:00Z",
            "--service",
            "billing",
            "--service",
            "shop",
            "--ascending",
        ])
        .unwrap();

        assert_eq!(cli.format, Format::Json);
        match cli.command {
            Commands::List {
                from,
                to,
                service,
                page,
                ascending,
            } => {
                assert_eq!(from.map(|t| t.timestamp()), Some(1_772_323_200));
                assert!(to.is_none());
                assert_eq!(service, vec!["billing", "shop"]);
                assert_eq!(page, 20);
                assert!(ascending);
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn prefix_requires_code() {
        assert!(Cli::try_parse_from(["stagelog", "crashes", "--prefix"]).is_err());
        assert!(Cli::try_parse_from(["stagelog", "crashes", "--code", "shop404", "--prefix"]).is_ok());
    }

    #[test]
    fn window_defaults_to_one_day() {
        let (from, to) = window(None, None);
        assert_eq!(to - from, Duration::days(1));
    }
}
