//! `mnemo migrate --from <backend> --to <backend>`.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use mnemo_core::migrate::{MigrationFailure, MigrationPolicy, MigrationProgress, Migrator};
use mnemo_infra::wiring::open_backend;
use mnemo_types::config::BackendKind;

use crate::state::AppState;

/// Copy every record missing from `to` out of `from`.
///
/// The report is printed before a partial failure is returned, so the
/// process exits with the migration code but the user still sees what moved.
pub async fn migrate(
    state: &AppState,
    from: BackendKind,
    to: BackendKind,
    json: bool,
    quiet: bool,
) -> Result<()> {
    if from == to {
        anyhow::bail!("Source and target are both '{from}'");
    }

    let store_config = &state.config.store;
    let source = open_backend(from, store_config, &state.data_dir)
        .await
        .with_context(|| format!("Failed to open source backend '{from}'"))?;
    let target = open_backend(to, store_config, &state.data_dir)
        .await
        .with_context(|| format!("Failed to open target backend '{to}'"))?;

    let migrator = Migrator::new(MigrationPolicy {
        backoff: store_config.retry_backoff(),
        timeout: store_config.backend_timeout(),
        ..Default::default()
    });

    let bar = if json || quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.set_message(format!("{from} -> {to}"));

    let progress = |p: &MigrationProgress| {
        if let Some(total) = p.total {
            bar.set_length(total);
        }
        bar.set_position(p.processed as u64);
        bar.set_message(format!(
            "{} migrated, {} skipped, {} failed",
            p.migrated, p.skipped, p.failed
        ));
    };
    let result = migrator.run(&source, &target, Some(&progress)).await;
    bar.finish_and_clear();
    let report = result.context("Migration aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        println!();
        println!(
            "  {} Migrated {} -> {}: {} copied, {} already present, {} failed",
            if report.failed.is_empty() {
                style("✓").green().bold()
            } else {
                style("!").yellow().bold()
            },
            style(from).cyan(),
            style(to).cyan(),
            style(report.migrated).bold(),
            report.skipped,
            report.failed.len(),
        );
        print_failures(&report.failed);
        println!();
    }

    match report.partial_failure() {
        Some(partial) => Err(partial.into()),
        None => Ok(()),
    }
}

/// List records that could not be copied.
pub fn print_failures(failed: &[MigrationFailure]) {
    if failed.is_empty() {
        return;
    }
    println!();
    println!("  {}", style("Failed records:").red().bold());
    for failure in failed {
        println!("    {} {}", style(&failure.id).cyan(), style(&failure.reason).dim());
    }
}
