//! Dual-backend record store.
//!
//! Routes every operation to the primary backend and falls back to an
//! optional secondary. Writes and patches retry the primary once after a
//! short backoff, then land on the secondary flagged `degraded`. Reads fall
//! back on primary failure and on primary `NotFound`, since a degraded record
//! lives only on the secondary until `reconcile` copies it back.
//! `Conflict` and `NotFound` are answers, never failover triggers.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mnemo_types::config::StoreConfig;
use mnemo_types::error::{RepositoryError, StoreError};
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Record, RecordDraft, RecordId, TagSet, VersionEntry, VersionOp};

use super::bounded;
use super::box_backend::BoxRecordBackend;
use super::id::RecordIdGenerator;
use crate::migrate::{MigrationPolicy, MigrationReport, Migrator, ProgressFn};

/// Attempts at finding an unused id before giving up on a write.
const ID_COLLISION_ATTEMPTS: usize = 3;

/// Page size when scanning the secondary during reconcile.
const RECONCILE_PAGE: usize = 100;

/// Timing knobs for the fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePolicy {
    /// Pause before the single retry against the primary.
    pub retry_backoff: Duration,
    /// Upper bound on any single backend call.
    pub backend_timeout: Duration,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(250),
            backend_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&StoreConfig> for StorePolicy {
    fn from(config: &StoreConfig) -> Self {
        Self {
            retry_backoff: config.retry_backoff(),
            backend_timeout: config.backend_timeout(),
        }
    }
}

/// Outcome of [`Store::reconcile`].
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Records copied from the secondary to the primary.
    pub migration: MigrationReport,
    /// Records whose degraded tag patches were replayed onto the primary.
    pub tags_synced: usize,
}

/// Versioned record store over a primary and an optional secondary backend.
pub struct Store {
    primary: BoxRecordBackend,
    secondary: Option<BoxRecordBackend>,
    ids: RecordIdGenerator,
    policy: StorePolicy,
}

impl Store {
    pub fn new(
        primary: BoxRecordBackend,
        secondary: Option<BoxRecordBackend>,
        policy: StorePolicy,
    ) -> Self {
        Self {
            primary,
            secondary,
            ids: RecordIdGenerator::new(),
            policy,
        }
    }

    pub fn primary(&self) -> &BoxRecordBackend {
        &self.primary
    }

    pub fn secondary(&self) -> Option<&BoxRecordBackend> {
        self.secondary.as_ref()
    }

    pub fn policy(&self) -> StorePolicy {
        self.policy
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Assign an id to `draft` and persist it with its `create` entry.
    ///
    /// Durable before return. If the primary stays unavailable after one
    /// retry the record is written to the secondary and comes back with
    /// `degraded = true` in its metadata.
    #[tracing::instrument(skip(self, draft), fields(category = %draft.category))]
    pub async fn write(&self, draft: RecordDraft) -> Result<Record, StoreError> {
        if draft.content.summary.trim().is_empty() {
            return Err(StoreError::Invalid("summary must not be empty".to_string()));
        }

        for _ in 0..ID_COLLISION_ATTEMPTS {
            let (id, created_at) = self.ids.next();
            let record = Record::from_draft(draft.clone(), id, created_at);
            let history = [VersionEntry::create(&record)];

            let result = self
                .retrying(&self.primary, "write", || self.primary.insert(&record, &history))
                .await;
            match result {
                Ok(()) => {
                    tracing::debug!(id = %record.id, backend = self.primary.name(), "record written");
                    return Ok(record);
                }
                Err(RepositoryError::Duplicate(_)) => {
                    // The first attempt may have committed before timing out.
                    let existing = bounded(self.policy.backend_timeout, self.primary.get(&record.id)).await;
                    if existing.is_ok_and(|existing| existing == record) {
                        return Ok(record);
                    }
                    tracing::warn!(id = %record.id, "record id already taken; assigning a new one");
                }
                Err(e) if e.is_failover() => return self.write_degraded(record, e).await,
                Err(e) => return Err(StoreError::Backend(e.to_string())),
            }
        }

        Err(StoreError::Backend(
            "could not assign an unused record id".to_string(),
        ))
    }

    async fn write_degraded(
        &self,
        mut record: Record,
        primary_err: RepositoryError,
    ) -> Result<Record, StoreError> {
        let Some(secondary) = &self.secondary else {
            return Err(self.unavailable(primary_err));
        };

        record.mark_degraded(secondary.name());
        let history = [VersionEntry::create(&record)];
        match bounded(self.policy.backend_timeout, secondary.insert(&record, &history)).await {
            Ok(()) => {
                tracing::warn!(
                    id = %record.id,
                    primary = self.primary.name(),
                    secondary = secondary.name(),
                    error = %primary_err,
                    "primary unavailable; record written to secondary"
                );
                Ok(record)
            }
            Err(e) => Err(self.both_failed(&primary_err, secondary, &e)),
        }
    }

    /// Add and remove tags on a record.
    ///
    /// `expected_version`, when given, must match the record's current
    /// version. A patch that changes nothing returns the record unchanged
    /// without a new version entry.
    #[tracing::instrument(skip(self, add, remove), fields(id = %id))]
    pub async fn patch_tags(
        &self,
        id: &RecordId,
        add: &[String],
        remove: &[String],
        expected_version: Option<u32>,
    ) -> Result<Record, StoreError> {
        self.apply_tags(id, expected_version, "patch_tags", |tags| {
            let mut next = tags.clone();
            for tag in remove {
                next.remove(tag);
            }
            next.extend(add.iter().map(String::as_str));
            next
        })
        .await
    }

    /// Restore the tag set recorded at `to_version` as a new version.
    ///
    /// History is never rewritten; the rollback is itself an `update_tags` entry.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn rollback_tags(&self, id: &RecordId, to_version: u32) -> Result<Record, StoreError> {
        let history = self.history(id).await?;
        let target = history
            .iter()
            .find(|e| e.version == to_version)
            .map(|e| e.tags.clone())
            .ok_or_else(|| StoreError::Invalid(format!("{id} has no version {to_version}")))?;
        self.apply_tags(id, None, "rollback_tags", move |_| target)
            .await
    }

    async fn apply_tags<F>(
        &self,
        id: &RecordId,
        expected_version: Option<u32>,
        op: &'static str,
        f: F,
    ) -> Result<Record, StoreError>
    where
        F: FnOnce(&TagSet) -> TagSet,
    {
        let (current, on_primary) = self.locate(id).await?;

        if let Some(expected) = expected_version.filter(|v| *v != current.version) {
            return Err(StoreError::Conflict {
                id: id.clone(),
                expected,
                actual: current.version,
            });
        }

        let tags = f(&current.tags);
        if tags == current.tags {
            tracing::debug!(op, "tag patch changes nothing");
            return Ok(current);
        }
        let at = Utc::now();

        if !on_primary {
            // Degraded record: it lives on the secondary until reconciled.
            let Some(secondary) = &self.secondary else {
                return Err(StoreError::NotFound(id.clone()));
            };
            return match bounded(
                self.policy.backend_timeout,
                secondary.update_tags(id, current.version, &tags, at),
            )
            .await
            {
                Ok(record) => Ok(record),
                Err(e) => self.patch_failed(secondary, id, current.version, &tags, e).await,
            };
        }

        let result = self
            .retrying(&self.primary, op, || {
                self.primary.update_tags(id, current.version, &tags, at)
            })
            .await;
        match result {
            Ok(record) => Ok(record),
            Err(e) if e.is_failover() => self.patch_degraded(current, tags, at, e).await,
            Err(e) => self.patch_failed(&self.primary, id, current.version, &tags, e).await,
        }
    }

    /// Find a record for patching and report whether it came from the primary.
    async fn locate(&self, id: &RecordId) -> Result<(Record, bool), StoreError> {
        let primary_err = match self
            .retrying(&self.primary, "read", || self.primary.get(id))
            .await
        {
            Ok(record) => return Ok((record, true)),
            Err(e) => e,
        };

        let not_found = matches!(primary_err, RepositoryError::NotFound);
        let secondary = match &self.secondary {
            Some(secondary) if not_found || primary_err.is_failover() => secondary,
            _ => return Err(self.read_error(Some(id), primary_err)),
        };

        match bounded(self.policy.backend_timeout, secondary.get(id)).await {
            Ok(record) => Ok((record, false)),
            Err(_) if not_found => Err(StoreError::NotFound(id.clone())),
            Err(RepositoryError::NotFound) => Err(self.unavailable(primary_err)),
            Err(e) => Err(self.both_failed(&primary_err, secondary, &e)),
        }
    }

    /// Apply a patch to the secondary because the primary could not take it.
    async fn patch_degraded(
        &self,
        current: Record,
        tags: TagSet,
        at: DateTime<Utc>,
        primary_err: RepositoryError,
    ) -> Result<Record, StoreError> {
        let Some(secondary) = &self.secondary else {
            return Err(self.unavailable(primary_err));
        };
        let id = current.id.clone();

        // The secondary may already hold a copy from an earlier degraded patch.
        match bounded(self.policy.backend_timeout, secondary.get(&id)).await {
            Ok(copy) => {
                return match bounded(
                    self.policy.backend_timeout,
                    secondary.update_tags(&id, copy.version, &tags, at),
                )
                .await
                {
                    Ok(record) => {
                        tracing::warn!(id = %id, error = %primary_err, "primary unavailable; tag patch applied to secondary copy");
                        Ok(record)
                    }
                    Err(e) => self.patch_failed(secondary, &id, copy.version, &tags, e).await,
                };
            }
            Err(RepositoryError::NotFound) => {}
            Err(e) => return Err(self.both_failed(&primary_err, secondary, &e)),
        }

        // The copy's create entry keeps the original creation time, so
        // `state_at` between creation and this patch still finds it. Earlier
        // versions are not copied; that window reports the copied version.
        let mut snapshot = current;
        snapshot.mark_degraded(secondary.name());
        let base = VersionEntry {
            record_id: id.clone(),
            version: snapshot.version,
            op: VersionOp::Create,
            tags: snapshot.tags.clone(),
            timestamp: snapshot.created_at,
        };
        let mut updated = snapshot;
        updated.tags = tags;
        updated.version += 1;
        let history = [base, VersionEntry::update_tags(&updated, at)];

        match bounded(self.policy.backend_timeout, secondary.insert(&updated, &history)).await {
            Ok(()) => {
                tracing::warn!(
                    id = %id,
                    primary = self.primary.name(),
                    secondary = secondary.name(),
                    error = %primary_err,
                    "primary unavailable; patched copy written to secondary"
                );
                Ok(updated)
            }
            Err(e) => Err(self.both_failed(&primary_err, secondary, &e)),
        }
    }

    /// Map a failed `update_tags` to a store error.
    ///
    /// A conflict right after a retried call may be our own first attempt
    /// having landed; that case is reported as success.
    async fn patch_failed(
        &self,
        backend: &BoxRecordBackend,
        id: &RecordId,
        expected: u32,
        tags: &TagSet,
        err: RepositoryError,
    ) -> Result<Record, StoreError> {
        match err {
            RepositoryError::Conflict(_) => {
                match bounded(self.policy.backend_timeout, backend.get(id)).await {
                    Ok(current) if current.version == expected + 1 && current.tags == *tags => {
                        Ok(current)
                    }
                    Ok(current) => Err(StoreError::Conflict {
                        id: id.clone(),
                        expected,
                        actual: current.version,
                    }),
                    Err(_) => Err(StoreError::Conflict {
                        id: id.clone(),
                        expected,
                        actual: expected + 1,
                    }),
                }
            }
            other => Err(self.read_error(Some(id), other)),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Fetch a record by id.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn read(&self, id: &RecordId) -> Result<Record, StoreError> {
        self.read_with_fallback("read", Some(id), |b| b.get(id)).await
    }

    /// List records, newest first.
    #[tracing::instrument(skip(self, query))]
    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, StoreError> {
        self.read_with_fallback("list", None, |b| b.list(query)).await
    }

    /// Full-text search, newest first.
    #[tracing::instrument(skip(self, query))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, StoreError> {
        self.read_with_fallback("search", None, |b| b.search(query)).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.read_with_fallback("stats", None, |b| b.stats()).await
    }

    /// Version entries of a record, oldest first.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn history(&self, id: &RecordId) -> Result<Vec<VersionEntry>, StoreError> {
        self.read_with_fallback("history", Some(id), |b| b.history(id))
            .await
    }

    /// Reconstruct a record as it stood at `at`.
    ///
    /// Returns `None` if the record was created after `at`.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub async fn state_at(
        &self,
        id: &RecordId,
        at: DateTime<Utc>,
    ) -> Result<Option<Record>, StoreError> {
        let record = self.read(id).await?;
        let history = self.history(id).await?;
        let Some(entry) = history.iter().rev().find(|e| e.timestamp <= at) else {
            return Ok(None);
        };
        let mut state = record;
        state.tags = entry.tags.clone();
        state.version = entry.version;
        Ok(Some(state))
    }

    async fn read_with_fallback<'s, T, F, Fut>(
        &'s self,
        op: &'static str,
        id: Option<&RecordId>,
        f: F,
    ) -> Result<T, StoreError>
    where
        F: Fn(&'s BoxRecordBackend) -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let primary_err = match bounded(self.policy.backend_timeout, f(&self.primary)).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let not_found = matches!(primary_err, RepositoryError::NotFound);
        let secondary = match &self.secondary {
            Some(secondary) if not_found || primary_err.is_failover() => secondary,
            _ => return Err(self.read_error(id, primary_err)),
        };

        match bounded(self.policy.backend_timeout, f(secondary)).await {
            Ok(value) => {
                if !not_found {
                    tracing::warn!(
                        op,
                        primary = self.primary.name(),
                        error = %primary_err,
                        "primary unavailable; served from secondary"
                    );
                }
                Ok(value)
            }
            Err(e) if not_found => {
                if !matches!(e, RepositoryError::NotFound) {
                    tracing::warn!(op, secondary = secondary.name(), error = %e, "secondary lookup failed");
                }
                Err(self.read_error(id, primary_err))
            }
            // Primary down and the secondary never saw the record.
            Err(RepositoryError::NotFound) => Err(self.unavailable(primary_err)),
            Err(e) => Err(self.both_failed(&primary_err, secondary, &e)),
        }
    }

    // -----------------------------------------------------------------------
    // Reconcile
    // -----------------------------------------------------------------------

    /// Copy degraded writes from the secondary back to the primary.
    ///
    /// Records present only on the secondary are migrated with their ids and
    /// history. Degraded copies of records the primary already holds have
    /// their newer tag set replayed onto the primary.
    #[tracing::instrument(skip(self, progress))]
    pub async fn reconcile(
        &self,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<ReconcileReport, StoreError> {
        let Some(secondary) = &self.secondary else {
            return Ok(ReconcileReport::default());
        };

        let migrator = Migrator::new(MigrationPolicy {
            timeout: self.policy.backend_timeout,
            ..Default::default()
        });
        let migration = migrator.run(secondary, &self.primary, progress).await?;
        let tags_synced = self.sync_degraded_tags(secondary).await?;

        tracing::info!(
            migrated = migration.migrated,
            skipped = migration.skipped,
            failed = migration.failed.len(),
            tags_synced,
            "reconcile finished"
        );
        Ok(ReconcileReport {
            migration,
            tags_synced,
        })
    }

    async fn sync_degraded_tags(&self, secondary: &BoxRecordBackend) -> Result<usize, StoreError> {
        let mut synced = 0;
        let mut offset = 0;
        loop {
            let query = ListQuery::page(offset, RECONCILE_PAGE);
            let page = bounded(self.policy.backend_timeout, secondary.list(&query))
                .await
                .map_err(|e| self.read_error(None, e))?;

            for copy in page.iter().filter(|r| r.is_degraded()) {
                let primary = match bounded(self.policy.backend_timeout, self.primary.get(&copy.id)).await {
                    Ok(primary) => primary,
                    Err(e) => {
                        tracing::debug!(id = %copy.id, error = %e, "skipping tag sync");
                        continue;
                    }
                };
                if copy.version <= primary.version || copy.tags == primary.tags {
                    continue;
                }
                match bounded(
                    self.policy.backend_timeout,
                    self.primary
                        .update_tags(&copy.id, primary.version, &copy.tags, Utc::now()),
                )
                .await
                {
                    Ok(_) => synced += 1,
                    Err(e) => tracing::warn!(id = %copy.id, error = %e, "tag sync failed"),
                }
            }

            if page.len() < RECONCILE_PAGE {
                break;
            }
            offset += page.len();
        }
        Ok(synced)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Bounded call with one retry after `retry_backoff` on failover errors.
    async fn retrying<T, F, Fut>(
        &self,
        backend: &BoxRecordBackend,
        op: &'static str,
        f: F,
    ) -> Result<T, RepositoryError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        match bounded(self.policy.backend_timeout, f()).await {
            Err(e) if e.is_failover() => {
                tracing::warn!(backend = backend.name(), op, error = %e, "backend call failed; retrying once");
                tokio::time::sleep(self.policy.retry_backoff).await;
                bounded(self.policy.backend_timeout, f()).await
            }
            other => other,
        }
    }

    fn unavailable(&self, err: RepositoryError) -> StoreError {
        match err {
            RepositoryError::Timeout(limit) => StoreError::Timeout(limit),
            other => StoreError::StoreUnavailable(format!("{}: {other}", self.primary.name())),
        }
    }

    fn both_failed(
        &self,
        primary_err: &RepositoryError,
        secondary: &BoxRecordBackend,
        secondary_err: &RepositoryError,
    ) -> StoreError {
        StoreError::StoreUnavailable(format!(
            "{}: {primary_err}; {}: {secondary_err}",
            self.primary.name(),
            secondary.name()
        ))
    }

    fn read_error(&self, id: Option<&RecordId>, err: RepositoryError) -> StoreError {
        match (err, id) {
            (RepositoryError::NotFound, Some(id)) => StoreError::NotFound(id.clone()),
            (e, _) if e.is_failover() => self.unavailable(e),
            (e, _) => StoreError::Backend(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBackend;
    use mnemo_types::record::{Category, MetadataValue, RecordContent};

    fn fast_policy() -> StorePolicy {
        StorePolicy {
            retry_backoff: Duration::from_millis(1),
            backend_timeout: Duration::from_millis(200),
        }
    }

    fn draft(category: Category, tags: &[&str], summary: &str) -> RecordDraft {
        let mut draft = RecordDraft::new(
            category,
            RecordContent {
                summary: summary.to_string(),
                key_topics: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            },
        );
        draft.tags = tags.iter().copied().collect();
        draft
    }

    fn single() -> (Store, MemoryBackend) {
        let primary = MemoryBackend::new("primary");
        let store = Store::new(BoxRecordBackend::new(primary.clone()), None, fast_policy());
        (store, primary)
    }

    fn dual() -> (Store, MemoryBackend, MemoryBackend) {
        let primary = MemoryBackend::new("primary");
        let secondary = MemoryBackend::new("secondary");
        let store = Store::new(
            BoxRecordBackend::new(primary.clone()),
            Some(BoxRecordBackend::new(secondary.clone())),
            fast_policy(),
        );
        (store, primary, secondary)
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (store, _) = single();
        let d = draft(Category::Learning, &["python", "async"], "discovered X");
        let written = store.write(d.clone()).await.unwrap();

        let read = store.read(&written.id).await.unwrap();
        assert_eq!(read.category, d.category);
        assert_eq!(read.tags, d.tags);
        assert_eq!(read.content, d.content);
        assert_eq!(read.metadata, d.metadata);
        assert_eq!(read.version, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.count(Category::Learning), 1);
        assert_eq!(stats.total, 1);

        let history = store.history(&written.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].op, VersionOp::Create);
    }

    #[tokio::test]
    async fn test_write_rejects_empty_summary() {
        let (store, primary) = single();
        let err = store
            .write(draft(Category::Insight, &[], "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(primary.is_empty());
    }

    #[tokio::test]
    async fn test_ids_sort_in_write_order() {
        let (store, _) = single();
        let a = store.write(draft(Category::Insight, &[], "a")).await.unwrap();
        let b = store.write(draft(Category::Insight, &[], "b")).await.unwrap();
        assert!(a.id < b.id);
        let listed = store.list(&ListQuery::default()).await.unwrap();
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (store, _) = single();
        let err = store.read(&RecordId::from("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_patch_tags_idempotent_add() {
        let (store, _) = single();
        let r = store.write(draft(Category::Pattern, &["x"], "s")).await.unwrap();

        let once = store.patch_tags(&r.id, &tags(&["y"]), &[], None).await.unwrap();
        let twice = store.patch_tags(&r.id, &tags(&["y"]), &[], None).await.unwrap();
        assert_eq!(once.tags, twice.tags);
        assert_eq!(once.version, 2);
        assert_eq!(twice.version, 2);
        assert_eq!(store.history(&r.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_patch_tags_stale_version_conflicts() {
        let (store, _) = single();
        let r = store.write(draft(Category::Insight, &[], "s")).await.unwrap();

        store
            .patch_tags(&r.id, &tags(&["a"]), &[], Some(r.version))
            .await
            .unwrap();
        let err = store
            .patch_tags(&r.id, &tags(&["b"]), &[], Some(r.version))
            .await
            .unwrap_err();
        match err {
            StoreError::Conflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        let current = store.read(&r.id).await.unwrap();
        assert!(current.tags.contains("a"));
        assert!(!current.tags.contains("b"));
    }

    #[tokio::test]
    async fn test_concurrent_patches_one_conflicts() {
        let (store, primary) = single();
        let r = store.write(draft(Category::Insight, &[], "s")).await.unwrap();

        // Both patches read version 1 before either commits.
        primary.set_latency(Some(Duration::from_millis(20)));
        let add_a = tags(&["a"]);
        let add_b = tags(&["b"]);
        let (first, second) = tokio::join!(
            store.patch_tags(&r.id, &add_a, &[], None),
            store.patch_tags(&r.id, &add_b, &[], None),
        );
        let conflicts = [&first, &second]
            .iter()
            .filter(|res| matches!(res, Err(StoreError::Conflict { .. })))
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(store.read(&r.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_patch_missing_record() {
        let (store, _) = single();
        let err = store
            .patch_tags(&RecordId::from("nope"), &tags(&["a"]), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rollback_appends_new_version() {
        let (store, _) = single();
        let r = store.write(draft(Category::Insight, &["base"], "s")).await.unwrap();
        store
            .patch_tags(&r.id, &tags(&["extra"]), &tags(&["base"]), None)
            .await
            .unwrap();

        let rolled = store.rollback_tags(&r.id, 1).await.unwrap();
        assert_eq!(rolled.version, 3);
        assert_eq!(rolled.tags.sorted(), vec!["base".to_string()]);

        let history = store.history(&r.id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history[2].tags.contains("base"));

        let err = store.rollback_tags(&r.id, 9).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_state_at_replays_history() {
        let (store, _) = single();
        let r = store.write(draft(Category::Insight, &["v1"], "s")).await.unwrap();
        assert!(
            store
                .state_at(&r.id, r.created_at - chrono::Duration::seconds(1))
                .await
                .unwrap()
                .is_none()
        );

        let between = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .patch_tags(&r.id, &tags(&["v2"]), &tags(&["v1"]), None)
            .await
            .unwrap();

        let then = store.state_at(&r.id, between).await.unwrap().unwrap();
        assert_eq!(then.version, 1);
        assert!(then.tags.contains("v1"));

        let now = store.state_at(&r.id, Utc::now()).await.unwrap().unwrap();
        assert_eq!(now.version, 2);
        assert!(now.tags.contains("v2"));
    }

    #[tokio::test]
    async fn test_transient_primary_failure_is_retried() {
        let (store, primary, secondary) = dual();
        primary.fail_next(1);
        let r = store.write(draft(Category::Insight, &[], "s")).await.unwrap();
        assert!(!r.is_degraded());
        assert!(primary.contains(&r.id));
        assert!(secondary.is_empty());
    }

    #[tokio::test]
    async fn test_primary_outage_degrades_then_reconciles() {
        let (store, primary, secondary) = dual();
        primary.set_available(false);

        let r = store
            .write(draft(Category::Learning, &["python"], "written during outage"))
            .await
            .unwrap();
        assert!(r.is_degraded());
        assert_eq!(
            r.metadata.get("backend"),
            Some(&MetadataValue::Text("secondary".to_string()))
        );
        assert!(secondary.contains(&r.id));

        // Reads fall back while the primary is down.
        assert_eq!(store.read(&r.id).await.unwrap().id, r.id);

        primary.set_available(true);
        // Reads fall back on primary NotFound until reconciled.
        assert_eq!(store.read(&r.id).await.unwrap().id, r.id);
        assert!(!primary.contains(&r.id));

        let report = store.reconcile(None).await.unwrap();
        assert_eq!(report.migration.migrated, 1);
        assert!(primary.contains(&r.id));

        let again = store.reconcile(None).await.unwrap();
        assert_eq!(again.migration.migrated, 0);
        assert_eq!(again.migration.skipped, 1);
    }

    #[tokio::test]
    async fn test_both_backends_down_is_unavailable() {
        let (store, primary, secondary) = dual();
        primary.set_available(false);
        secondary.set_available(false);
        let err = store
            .write(draft(Category::Insight, &[], "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StoreUnavailable(_)));
        let err = store.stats().await.unwrap_err();
        assert!(matches!(err, StoreError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_primary_timeout_without_secondary() {
        let (store, primary) = single();
        primary.set_latency(Some(Duration::from_secs(1)));
        let err = store
            .write(draft(Category::Insight, &[], "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_conflict_does_not_fail_over() {
        let (store, primary, secondary) = dual();
        let r = store.write(draft(Category::Insight, &[], "s")).await.unwrap();
        store.patch_tags(&r.id, &tags(&["a"]), &[], None).await.unwrap();
        let calls_before = secondary.calls();

        let err = store
            .patch_tags(&r.id, &tags(&["b"]), &[], Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(secondary.calls(), calls_before);
        assert!(primary.contains(&r.id));
    }

    #[tokio::test]
    async fn test_patch_during_full_outage_is_unavailable() {
        let (store, primary, _) = dual();
        let r = store.write(draft(Category::Insight, &["a"], "s")).await.unwrap();
        primary.set_available(false);
        let err = store
            .patch_tags(&r.id, &tags(&["b"]), &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_degraded_patch_syncs_on_reconcile() {
        let (store, primary, secondary) = dual();
        let r = store.write(draft(Category::Insight, &["a"], "s")).await.unwrap();

        // The primary took the read but refused the update.
        let degraded = store
            .patch_degraded(
                r.clone(),
                ["a", "b"].into_iter().collect(),
                Utc::now(),
                RepositoryError::Unavailable("down".into()),
            )
            .await
            .unwrap();
        assert!(degraded.is_degraded());
        assert_eq!(degraded.version, 2);
        assert!(secondary.contains(&r.id));
        assert_eq!(secondary_history_len(&store, &r.id).await, 2);

        let report = store.reconcile(None).await.unwrap();
        assert_eq!(report.migration.skipped, 1);
        assert_eq!(report.tags_synced, 1);
        assert!(primary.contains(&r.id));
        let synced = store.read(&r.id).await.unwrap();
        assert!(synced.tags.contains("b"));
        assert_eq!(synced.version, 2);

        let again = store.reconcile(None).await.unwrap();
        assert_eq!(again.tags_synced, 0);
    }

    #[tokio::test]
    async fn test_degraded_copy_keeps_creation_time() {
        let (store, primary, _) = dual();
        let r = store.write(draft(Category::Insight, &["a"], "s")).await.unwrap();
        let patched_at = r.created_at + chrono::Duration::hours(1);
        store
            .patch_degraded(
                r.clone(),
                ["a", "b"].into_iter().collect(),
                patched_at,
                RepositoryError::Unavailable("down".into()),
            )
            .await
            .unwrap();

        // Only the secondary copy can answer now.
        primary.set_available(false);
        let history = store.history(&r.id).await.unwrap();
        assert_eq!(history[0].timestamp, r.created_at);

        let before_patch = store
            .state_at(&r.id, r.created_at + chrono::Duration::minutes(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before_patch.version, 1);
        assert!(!before_patch.tags.contains("b"));

        let after_patch = store.state_at(&r.id, patched_at).await.unwrap().unwrap();
        assert!(after_patch.tags.contains("b"));

        let before_create = store
            .state_at(&r.id, r.created_at - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(before_create.is_none());
    }

    async fn secondary_history_len(store: &Store, id: &RecordId) -> usize {
        store.secondary().unwrap().history(id).await.unwrap().len()
    }
}
