//! RecordBackend trait definition.
//!
//! The contract every persistence backend (file, relational, in-memory)
//! implements. The dual-backend `Store` layers id assignment, retries and
//! failover on top; backends only persist and answer.

use chrono::{DateTime, Utc};

use mnemo_types::error::RepositoryError;
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Record, RecordId, TagSet, VersionEntry};

/// Backend trait for record persistence.
///
/// Implementations live in mnemo-infra (e.g., `SqliteRecordBackend`,
/// `FileRecordBackend`). Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait RecordBackend: Send + Sync {
    /// Short name used in logs and the `backend` metadata key.
    fn name(&self) -> &str;

    /// Persist a new record together with its version history.
    ///
    /// `history` is oldest first and ends with the entry for `record.version`.
    /// The record and all entries commit atomically. Returns
    /// `RepositoryError::Duplicate` if the id already exists.
    fn insert(
        &self,
        record: &Record,
        history: &[VersionEntry],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fetch a record by id. `RepositoryError::NotFound` if absent.
    fn get(
        &self,
        id: &RecordId,
    ) -> impl std::future::Future<Output = Result<Record, RepositoryError>> + Send;

    /// Replace a record's tags if its version is still `expected_version`.
    ///
    /// Bumps the version, appends an `update_tags` entry stamped `at`, and
    /// returns the updated record. `Conflict` if the version moved on.
    fn update_tags(
        &self,
        id: &RecordId,
        expected_version: u32,
        tags: &TagSet,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Record, RepositoryError>> + Send;

    /// List records, newest first (id descending as tiebreak).
    fn list(
        &self,
        query: &ListQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Record>, RepositoryError>> + Send;

    /// Full-text search, newest first.
    fn search(
        &self,
        query: &SearchQuery,
    ) -> impl std::future::Future<Output = Result<Vec<Record>, RepositoryError>> + Send;

    /// Aggregate counts.
    fn stats(&self) -> impl std::future::Future<Output = Result<StoreStats, RepositoryError>> + Send;

    /// Version history of a record, oldest first. `NotFound` if the record is absent.
    fn history(
        &self,
        id: &RecordId,
    ) -> impl std::future::Future<Output = Result<Vec<VersionEntry>, RepositoryError>> + Send;
}

/// Check that a history is insertable alongside `record`.
///
/// Backends call this before persisting so every backend enforces the same
/// shape: non-empty, starts with `create`, strictly increasing versions,
/// ending at the record's version.
pub fn validate_history(record: &Record, history: &[VersionEntry]) -> Result<(), RepositoryError> {
    use mnemo_types::record::VersionOp;

    let Some(first) = history.first() else {
        return Err(RepositoryError::Query("history is empty".to_string()));
    };
    if first.op != VersionOp::Create {
        return Err(RepositoryError::Query(
            "history must start with a create entry".to_string(),
        ));
    }
    if history.iter().any(|e| e.record_id != record.id) {
        return Err(RepositoryError::Query(
            "history entry belongs to another record".to_string(),
        ));
    }
    if history.windows(2).any(|w| w[1].version <= w[0].version) {
        return Err(RepositoryError::Query(
            "history versions must increase".to_string(),
        ));
    }
    match history.last() {
        Some(last) if last.version == record.version => Ok(()),
        _ => Err(RepositoryError::Query(format!(
            "history does not end at version {}",
            record.version
        ))),
    }
}

/// Order records newest first, id descending as tiebreak.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Aggregate statistics over an in-memory set of records.
pub fn compute_stats<'a>(records: impl IntoIterator<Item = &'a Record>) -> StoreStats {
    let mut stats = StoreStats::default();
    let mut tags = std::collections::BTreeSet::new();
    for record in records {
        stats.total += 1;
        *stats.per_category.entry(record.category).or_insert(0) += 1;
        tags.extend(record.tags.iter().map(str::to_string));
        if stats.last_updated.is_none_or(|last| record.created_at > last) {
            stats.last_updated = Some(record.created_at);
        }
    }
    stats.distinct_tags = tags.len() as u64;
    stats
}

/// Apply a list query's filter, order and page to an in-memory set of records.
pub fn page_records(mut records: Vec<Record>, query: &ListQuery) -> Vec<Record> {
    records.retain(|r| query.matches(r));
    sort_newest_first(&mut records);
    records
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect()
}
