//! Capture flow commands: `observe`, `capture`, `remember`, `session reset`.

use anyhow::{Context, Result};
use console::style;
use dialoguer::Confirm;
use tokio::io::AsyncReadExt;

use mnemo_core::capture::{CaptureCoordinator, CaptureOutcome, CaptureSettings, Confirmer};
use mnemo_core::distill::DistillHints;
use mnemo_types::record::{Category, Metadata, MetadataValue, Record, RecordContent, RecordDraft};

use crate::state::AppState;

const CAPTURE_PROMPT: &str = "Save a memory of this session?";

/// Interactive yes/no on the terminal.
///
/// `dialoguer` blocks, so the prompt runs on the blocking pool; the
/// coordinator's confirmation timeout bounds the wait.
pub struct DialoguerConfirmer;

impl Confirmer for DialoguerConfirmer {
    async fn confirm(&self, session_id: &str, prompt: &str) -> bool {
        let prompt = format!("[{session_id}] {prompt}");
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await;
        match answer {
            Ok(Ok(yes)) => yes,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "confirmation prompt failed; treating as no");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "confirmation task failed; treating as no");
                false
            }
        }
    }
}

/// Feed one usage observation. Prints the signal (always JSON) the first
/// time the session crosses the threshold; prints nothing otherwise.
pub async fn observe(state: &AppState, session: &str, usage: u64, capacity: u64) -> Result<()> {
    let monitor = state.monitor();
    if let Some(signal) = monitor.observe(session, usage, capacity).await? {
        println!("{}", serde_json::to_string(&signal)?);
    }
    Ok(())
}

/// Read a transcript from a file, or stdin for `-`.
pub async fn read_transcript(source: &str) -> Result<String> {
    if source == "-" {
        let mut transcript = String::new();
        tokio::io::stdin()
            .read_to_string(&mut transcript)
            .await
            .context("Failed to read transcript from stdin")?;
        return Ok(transcript);
    }
    tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("Failed to read transcript {source}"))
}

/// Distill a transcript and store the result.
#[allow(clippy::too_many_arguments)]
pub async fn capture(
    state: &AppState,
    session: &str,
    transcript_source: &str,
    category: Option<Category>,
    tags: Vec<String>,
    yes: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let transcript = read_transcript(transcript_source).await?;

    let mut metadata = Metadata::new();
    metadata.insert("session_id".to_string(), MetadataValue::from(session));
    metadata.insert("source".to_string(), MetadataValue::from("capture"));
    let hints = DistillHints {
        category,
        tags,
        metadata,
    };

    let outcome = capture_with(state, DialoguerConfirmer, session, transcript, hints, yes).await?;
    report_outcome(outcome, json, quiet)
}

/// Run one capture through the coordinator with the given confirmer.
pub async fn capture_with<C: Confirmer + 'static>(
    state: &AppState,
    confirmer: C,
    session: &str,
    transcript: String,
    hints: DistillHints,
    yes: bool,
) -> Result<CaptureOutcome> {
    let store = state.open_store().await?;
    let mut settings = CaptureSettings::from(&state.config.capture);
    settings.auto_save |= yes;

    let coordinator =
        CaptureCoordinator::new(state.monitor(), confirmer, state.distiller(), store, settings);
    coordinator.record_turn(session, transcript);
    let handle = coordinator.request_capture(session, CAPTURE_PROMPT, hints).await;
    Ok(handle.wait().await)
}

fn report_outcome(outcome: CaptureOutcome, json: bool, quiet: bool) -> Result<()> {
    match outcome {
        CaptureOutcome::Stored(record) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else if !quiet {
                print_stored("Captured", &record);
            }
            Ok(())
        }
        CaptureOutcome::Declined => {
            if json {
                println!("{}", serde_json::json!({ "outcome": "declined" }));
            } else if !quiet {
                println!();
                println!("  {} Capture declined. Nothing was stored.", style("i").blue().bold());
                println!();
            }
            Ok(())
        }
        CaptureOutcome::Duplicate { existing_id } => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "outcome": "duplicate", "existing_id": existing_id })
                );
            } else if !quiet {
                println!();
                println!(
                    "  {} Similar record {} already exists. Nothing was stored.",
                    style("i").blue().bold(),
                    style(&existing_id).cyan()
                );
                println!();
            }
            Ok(())
        }
        CaptureOutcome::Failed(e) => Err(anyhow::Error::from(e).context("Capture failed")),
    }
}

/// Store a hand-written record without distillation.
pub async fn remember(
    state: &AppState,
    summary: &str,
    category: Category,
    tags: &[String],
    json: bool,
    quiet: bool,
) -> Result<()> {
    let summary = summary.trim();
    if summary.is_empty() {
        anyhow::bail!("Summary cannot be empty");
    }

    let mut draft = RecordDraft::new(
        category,
        RecordContent {
            summary: summary.to_string(),
            ..Default::default()
        },
    );
    draft.tags.extend(tags.iter().map(String::as_str));
    draft
        .metadata
        .insert("source".to_string(), MetadataValue::from("manual"));

    let store = state.open_store().await?;
    let record = store.write(draft).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else if !quiet {
        print_stored("Remembered", &record);
    }
    Ok(())
}

/// Clear a session's one-shot capture flag so it can signal again.
pub async fn reset_session(state: &AppState, session: &str, json: bool, quiet: bool) -> Result<()> {
    state.monitor().reset(session).await?;
    if json {
        println!("{}", serde_json::json!({ "session": session, "reset": true }));
    } else if !quiet {
        println!();
        println!(
            "  {} Session {} reset.",
            style("✓").green().bold(),
            style(session).cyan()
        );
        println!();
    }
    Ok(())
}

fn print_stored(verb: &str, record: &Record) {
    println!();
    println!(
        "  {} {verb} {} [{}]",
        style("✓").green().bold(),
        style(&record.id).cyan().bold(),
        record.category
    );
    println!("    {}", record.content.summary);
    if record.is_degraded() {
        println!(
            "    {} stored on the secondary backend; run `mnemo store reconcile` later",
            style("degraded").yellow().bold()
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::testing::FixedConfirmer;
    use mnemo_types::config::MnemoConfig;
    use mnemo_types::error::{CaptureError, DistillationError};
    use mnemo_types::query::ListQuery;

    fn state(dir: &tempfile::TempDir) -> AppState {
        AppState {
            data_dir: dir.path().to_path_buf(),
            config: MnemoConfig::default(),
        }
    }

    const TRANSCRIPT: &str = "user: how do I share state between tokio tasks?\n\
        assistant: wrap it in an Arc and use a Mutex when it needs mutation.\n\
        user: decided to use dashmap instead for the session table.";

    #[tokio::test]
    async fn test_confirmed_capture_is_stored() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);

        let outcome = capture_with(
            &state,
            FixedConfirmer::yes(),
            "s1",
            TRANSCRIPT.to_string(),
            DistillHints {
                category: Some(Category::Learning),
                tags: vec!["tokio".to_string()],
                ..Default::default()
            },
            false,
        )
        .await
        .unwrap();

        let CaptureOutcome::Stored(record) = outcome else {
            panic!("expected stored");
        };
        assert_eq!(record.category, Category::Learning);
        assert!(record.tags.contains("tokio"));
        assert_eq!(record.transcript_length, TRANSCRIPT.len() as u64);

        let store = state.open_store().await.unwrap();
        assert_eq!(store.read(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_declined_capture_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        let outcome = capture_with(
            &state,
            FixedConfirmer::no(),
            "s1",
            TRANSCRIPT.to_string(),
            DistillHints::default(),
            false,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Declined));

        let store = state.open_store().await.unwrap();
        assert!(store.list(&ListQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_yes_skips_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let confirmer = FixedConfirmer::no();
        let outcome = capture_with(
            &state(&dir),
            confirmer.clone(),
            "s1",
            TRANSCRIPT.to_string(),
            DistillHints::default(),
            true,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, CaptureOutcome::Stored(_)));
        assert_eq!(confirmer.asked(), 0);
    }

    #[tokio::test]
    async fn test_empty_transcript_maps_to_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = capture_with(
            &state(&dir),
            FixedConfirmer::yes(),
            "s1",
            "   ".to_string(),
            DistillHints::default(),
            true,
        )
        .await
        .unwrap();
        assert!(matches!(
            outcome,
            CaptureOutcome::Failed(CaptureError::Distillation(DistillationError::EmptyTranscript))
        ));

        let err = report_outcome(outcome, true, true).unwrap_err();
        assert_eq!(crate::exit::exit_code(&err), crate::exit::EMPTY_TRANSCRIPT);
    }

    #[tokio::test]
    async fn test_remember_writes_manual_record() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        remember(&state, "prefer sqlx", Category::Insight, &["sql".to_string()], true, true)
            .await
            .unwrap();

        let store = state.open_store().await.unwrap();
        let records = store.list(&ListQuery::default()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content.summary, "prefer sqlx");
        assert!(records[0].tags.contains("sql"));
        assert_eq!(
            records[0].metadata.get("source"),
            Some(&MetadataValue::from("manual"))
        );

        assert!(remember(&state, "  ", Category::Insight, &[], true, true).await.is_err());
    }

    #[tokio::test]
    async fn test_observe_then_reset() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        observe(&state, "s1", 90, 100).await.unwrap();
        assert!(state.monitor().has_fired("s1").await.unwrap());

        reset_session(&state, "s1", true, true).await.unwrap();
        assert!(!state.monitor().has_fired("s1").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_transcript_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.txt");
        std::fs::write(&path, TRANSCRIPT).unwrap();
        assert_eq!(read_transcript(path.to_str().unwrap()).await.unwrap(), TRANSCRIPT);
        assert!(read_transcript("/definitely/missing.txt").await.is_err());
    }
}
