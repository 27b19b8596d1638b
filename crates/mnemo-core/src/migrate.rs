//! Backend-to-backend migration.
//!
//! Pages through the source, skips records the target already holds, and
//! copies the rest with their original ids and full version history.
//! Per-record failures are retried with exponential backoff, then recorded in
//! the report; one bad record never stops the run. Running twice is a no-op
//! the second time.

use std::time::Duration;

use serde::Serialize;

use mnemo_types::error::{MigrationPartialFailure, RepositoryError, StoreError};
use mnemo_types::query::ListQuery;
use mnemo_types::record::{Record, RecordId, VersionEntry, VersionOp};

use crate::store::BoxRecordBackend;
use crate::store::bounded;

/// Progress callback, invoked after every record.
pub type ProgressFn<'a> = &'a (dyn Fn(&MigrationProgress) + Send + Sync);

/// Migration tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationPolicy {
    pub page_size: usize,
    /// Retries per record after the first attempt.
    pub max_retries: u32,
    /// Base backoff, doubled on each retry.
    pub backoff: Duration,
    /// Upper bound on any single backend call.
    pub timeout: Duration,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_retries: 2,
            backoff: Duration::from_millis(200),
            timeout: Duration::from_secs(10),
        }
    }
}

/// A record that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub id: RecordId,
    pub reason: String,
}

/// Result of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub migrated: usize,
    pub skipped: usize,
    pub failed: Vec<MigrationFailure>,
}

impl MigrationReport {
    pub fn processed(&self) -> usize {
        self.migrated + self.skipped + self.failed.len()
    }

    /// `Some` when at least one record failed.
    pub fn partial_failure(&self) -> Option<MigrationPartialFailure> {
        if self.failed.is_empty() {
            return None;
        }
        Some(MigrationPartialFailure {
            migrated: self.migrated,
            skipped: self.skipped,
            failed: self.failed.len(),
        })
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationProgress {
    pub processed: usize,
    /// Source record count, if the source could report it.
    pub total: Option<u64>,
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Migrated,
    Skipped,
}

/// Copies records between backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct Migrator {
    policy: MigrationPolicy,
}

impl Migrator {
    pub fn new(policy: MigrationPolicy) -> Self {
        Self { policy }
    }

    /// Copy every record of `source` missing from `target`.
    ///
    /// Fails only if the source cannot be listed; per-record failures end up
    /// in [`MigrationReport::failed`].
    #[tracing::instrument(skip_all, fields(source = source.name(), target = target.name()))]
    pub async fn run(
        &self,
        source: &BoxRecordBackend,
        target: &BoxRecordBackend,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<MigrationReport, StoreError> {
        let total = bounded(self.policy.timeout, source.stats())
            .await
            .map(|stats| stats.total)
            .ok();
        let mut report = MigrationReport::default();
        let page_size = self.policy.page_size.max(1);
        let mut offset = 0;

        loop {
            let query = ListQuery::page(offset, page_size);
            let page = bounded(self.policy.timeout, source.list(&query))
                .await
                .map_err(|e| StoreError::StoreUnavailable(format!("{}: {e}", source.name())))?;

            for record in &page {
                match self.migrate_with_retry(source, target, record).await {
                    Ok(Outcome::Migrated) => report.migrated += 1,
                    Ok(Outcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!(id = %record.id, error = %e, "record migration failed");
                        report.failed.push(MigrationFailure {
                            id: record.id.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                if let Some(progress) = progress {
                    progress(&MigrationProgress {
                        processed: report.processed(),
                        total,
                        migrated: report.migrated,
                        skipped: report.skipped,
                        failed: report.failed.len(),
                    });
                }
            }

            if page.len() < page_size {
                break;
            }
            offset += page.len();
        }

        tracing::info!(
            migrated = report.migrated,
            skipped = report.skipped,
            failed = report.failed.len(),
            "migration finished"
        );
        Ok(report)
    }

    async fn migrate_with_retry(
        &self,
        source: &BoxRecordBackend,
        target: &BoxRecordBackend,
        record: &Record,
    ) -> Result<Outcome, RepositoryError> {
        let mut attempt = 0;
        loop {
            match self.migrate_one(source, target, record).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.policy.max_retries => {
                    let delay = self.policy.backoff * 2u32.saturating_pow(attempt);
                    tracing::debug!(id = %record.id, attempt, error = %e, "retrying record migration");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn migrate_one(
        &self,
        source: &BoxRecordBackend,
        target: &BoxRecordBackend,
        record: &Record,
    ) -> Result<Outcome, RepositoryError> {
        match bounded(self.policy.timeout, target.get(&record.id)).await {
            Ok(_) => {
                tracing::debug!(id = %record.id, "already on target; skipping");
                return Ok(Outcome::Skipped);
            }
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let mut history = bounded(self.policy.timeout, source.history(&record.id)).await?;
        if history.is_empty() {
            history.push(VersionEntry {
                record_id: record.id.clone(),
                version: record.version,
                op: VersionOp::Create,
                tags: record.tags.clone(),
                timestamp: record.created_at,
            });
        }

        match bounded(self.policy.timeout, target.insert(record, &history)).await {
            Ok(()) => Ok(Outcome::Migrated),
            Err(RepositoryError::Duplicate(_)) => Ok(Outcome::Skipped),
            Err(e) => Err(e),
        }
    }
}
