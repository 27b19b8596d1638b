//! `mnemo store ...`: read, search, tag, export and reconcile records.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use mnemo_core::retrieval::RetrievalEngine;
use mnemo_core::store::Store;
use mnemo_types::query::{ListQuery, SearchQuery};
use mnemo_types::record::{Category, Record, RecordId, VersionEntry};

use super::{StoreCommand, format_relative_time, truncate};
use crate::state::AppState;

/// Open the store and run one `store` subcommand.
pub async fn run(state: &AppState, command: StoreCommand, json: bool, quiet: bool) -> Result<()> {
    let store = state.open_store().await?;
    let engine = state.retrieval(Arc::clone(&store));

    match command {
        StoreCommand::Summary => summary(&engine, json).await,
        StoreCommand::Search {
            query,
            category,
            tags,
            limit,
        } => {
            let query = SearchQuery {
                text: Some(query),
                category,
                tags,
                limit,
            };
            search(&engine, &query, json).await
        }
        StoreCommand::List {
            category,
            tags,
            limit,
            offset,
        } => {
            let query = ListQuery {
                category,
                tags,
                limit,
                offset,
            };
            list(&store, &query, json).await
        }
        StoreCommand::Show { id, at } => show(&store, &id, at, json).await,
        StoreCommand::History { id } => history(&store, &id, json).await,
        StoreCommand::Tag {
            id,
            add,
            remove,
            expect_version,
        } => tag(&store, &id, &add, &remove, expect_version, json).await,
        StoreCommand::Topic { tag, limit } => topic(&engine, &tag, limit, json).await,
        StoreCommand::Export { out } => export(&engine, out.as_deref()).await,
        StoreCommand::Rollback { id, to_version } => rollback(&store, &id, to_version, json).await,
        StoreCommand::Reconcile => reconcile(&store, json, quiet).await,
    }
}

/// Print the store digest (or the JSON snapshot).
pub async fn summary(engine: &RetrievalEngine, json: bool) -> Result<()> {
    if json {
        let snapshot = engine.export_snapshot().await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let digest = engine.export_summary().await?;
    println!();
    for line in digest.lines() {
        println!("  {line}");
    }
    println!();
    Ok(())
}

pub async fn search(engine: &RetrievalEngine, query: &SearchQuery, json: bool) -> Result<()> {
    let records = engine.search(query).await?;
    let title = format!("Results for '{}'", query.text.as_deref().unwrap_or_default());
    print_records(&title, &records, json)
}

pub async fn list(store: &Store, query: &ListQuery, json: bool) -> Result<()> {
    let records = store.list(query).await?;
    print_records("Records", &records, json)
}

pub async fn topic(engine: &RetrievalEngine, tag: &str, limit: usize, json: bool) -> Result<()> {
    let records = engine.topic(tag, limit).await?;
    print_records(&format!("Records tagged #{tag}"), &records, json)
}

/// Show one record, optionally as it stood at `at`.
pub async fn show(store: &Store, id: &str, at: Option<DateTime<Utc>>, json: bool) -> Result<()> {
    let id = RecordId::from(id);
    let record = match at {
        Some(at) => match store.state_at(&id, at).await? {
            Some(record) => record,
            None => anyhow::bail!("Record '{id}' did not exist at {}", at.to_rfc3339()),
        },
        None => store.read(&id).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    print_record(&record);
    Ok(())
}

pub async fn history(store: &Store, id: &str, json: bool) -> Result<()> {
    let id = RecordId::from(id);
    let entries = store.history(&id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!();
    println!("  History of {}", style(&id).cyan().bold());
    println!();
    println!("{}", history_table(&entries));
    println!();
    Ok(())
}

/// Add and remove tags in one optimistic patch.
pub async fn tag(
    store: &Store,
    id: &str,
    add: &[String],
    remove: &[String],
    expect_version: Option<u32>,
    json: bool,
) -> Result<()> {
    if add.is_empty() && remove.is_empty() {
        anyhow::bail!("Nothing to do: pass --add and/or --remove");
    }
    let id = RecordId::from(id);
    let record = store.patch_tags(&id, add, remove, expect_version).await?;
    print_tag_result("Tagged", &record, json)
}

pub async fn rollback(store: &Store, id: &str, to_version: u32, json: bool) -> Result<()> {
    let id = RecordId::from(id);
    let record = store.rollback_tags(&id, to_version).await?;
    print_tag_result(&format!("Restored tags of v{to_version}"), &record, json)
}

/// Write the JSON snapshot to `out`, or stdout.
pub async fn export(engine: &RetrievalEngine, out: Option<&Path>) -> Result<()> {
    let snapshot = engine.export_snapshot().await?;
    let body = serde_json::to_string_pretty(&snapshot)?;

    let Some(path) = out else {
        println!("{body}");
        return Ok(());
    };

    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!(
        "  {} Exported {} record(s) to {}",
        style("✓").green().bold(),
        snapshot.recent.len(),
        style(path.display()).cyan()
    );
    Ok(())
}

/// Copy degraded records back to the primary.
///
/// Prints the report either way; a partial failure is returned afterwards so
/// the process exits with its own code.
pub async fn reconcile(store: &Store, json: bool, quiet: bool) -> Result<()> {
    if store.secondary().is_none() {
        if !json && !quiet {
            println!();
            println!(
                "  {} No secondary backend configured; nothing to reconcile.",
                style("i").blue().bold()
            );
            println!();
        }
        return Ok(());
    }

    let spinner = if json || quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.set_message("reconciling...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));

    let progress = |p: &mnemo_core::migrate::MigrationProgress| {
        spinner.set_message(format!(
            "reconciling... {} checked, {} copied",
            p.processed, p.migrated
        ));
    };
    let result = store.reconcile(Some(&progress)).await;
    spinner.finish_and_clear();
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        println!();
        println!(
            "  {} Reconciled: {} copied, {} already present, {} tag set(s) synced",
            style("✓").green().bold(),
            style(report.migration.migrated).bold(),
            report.migration.skipped,
            report.tags_synced,
        );
        super::migrate::print_failures(&report.migration.failed);
        println!();
    }

    match report.migration.partial_failure() {
        Some(partial) => Err(partial.into()),
        None => Ok(()),
    }
}

fn print_tag_result(action: &str, record: &Record, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }
    println!();
    println!(
        "  {} {action} {} (v{}): {}",
        style("✓").green().bold(),
        style(&record.id).cyan(),
        record.version,
        format_tags(record),
    );
    println!();
    Ok(())
}

fn print_records(title: &str, records: &[Record], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!();
        println!("  {} No records found.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    println!();
    println!("  {}", style(title).bold());
    println!();
    println!("{}", records_table(records));
    println!();
    println!(
        "  {} record{}",
        style(records.len()).bold(),
        if records.len() == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

fn category_cell(category: Category) -> Cell {
    let color = match category {
        Category::Insight => Color::Magenta,
        Category::Learning => Color::Cyan,
        Category::Pattern => Color::Yellow,
        Category::ContextSnapshot => Color::Blue,
    };
    Cell::new(category.to_string()).fg(color)
}

fn format_tags(record: &Record) -> String {
    if record.tags.is_empty() {
        return "-".to_string();
    }
    record
        .tags
        .iter()
        .map(|t| format!("#{t}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn records_table(records: &[Record]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Category").fg(Color::White),
        Cell::new("Summary").fg(Color::White),
        Cell::new("Tags").fg(Color::White),
        Cell::new("Ver").fg(Color::White),
        Cell::new("Created").fg(Color::White),
    ]);

    for record in records {
        let id_cell = if record.is_degraded() {
            Cell::new(format!("{} (degraded)", record.id)).fg(Color::Yellow)
        } else {
            Cell::new(record.id.to_string()).fg(Color::Cyan)
        };
        table.add_row(vec![
            id_cell,
            category_cell(record.category),
            Cell::new(truncate(&record.content.summary, 60)).fg(Color::White),
            Cell::new(format_tags(record)).fg(Color::DarkGrey),
            Cell::new(record.version),
            Cell::new(format_relative_time(&record.created_at)).fg(Color::DarkGrey),
        ]);
    }
    table
}

fn history_table(entries: &[VersionEntry]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Version").fg(Color::White),
        Cell::new("Op").fg(Color::White),
        Cell::new("Tags").fg(Color::White),
        Cell::new("When").fg(Color::White),
    ]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(format!("v{}", entry.version)).fg(Color::Cyan),
            Cell::new(entry.op.to_string()),
            Cell::new(entry.tags.sorted().join(", ")).fg(Color::DarkGrey),
            Cell::new(entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()).fg(Color::DarkGrey),
        ]);
    }
    table
}

fn print_record(record: &Record) {
    let content = &record.content;
    println!();
    println!(
        "  {} {}",
        style(&record.id).cyan().bold(),
        style(format!("[{}]", record.category)).dim()
    );
    if record.is_degraded() {
        println!(
            "  {} written while the primary backend was unavailable",
            style("degraded").yellow().bold()
        );
    }
    println!();
    println!("  {}", content.summary);
    println!();

    let section = |title: &str, items: &[String]| {
        if items.is_empty() {
            return;
        }
        println!("  {}", style(title).bold());
        for item in items {
            println!("    - {item}");
        }
        println!();
    };
    section("Key topics", &content.key_topics);
    section("Learnings", &content.learnings);
    section("Action items", &content.action_items);

    if !content.decisions.is_empty() {
        println!("  {}", style("Decisions").bold());
        for decision in &content.decisions {
            println!("    - {} ({})", decision.choice, style(&decision.rationale).dim());
        }
        println!();
    }

    for snippet in &content.code_snippets {
        println!(
            "  {} {}",
            style("Snippet").bold(),
            style(snippet.language_hint.as_deref().unwrap_or("text")).dim()
        );
        for line in snippet.text.lines() {
            println!("    {line}");
        }
        println!();
    }

    println!("  Tags:     {}", format_tags(record));
    println!("  Version:  {}", record.version);
    println!(
        "  Created:  {} ({})",
        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        format_relative_time(&record.created_at)
    );
    println!("  Source:   {} chars of transcript", record.transcript_length);
    for (key, value) in &record.metadata {
        println!("  {key}: {value}");
    }
    println!();
}
