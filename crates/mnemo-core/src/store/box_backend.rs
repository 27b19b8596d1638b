//! BoxRecordBackend -- object-safe dynamic dispatch wrapper for RecordBackend.
//!
//! 1. Define an object-safe `RecordBackendDyn` trait with boxed futures
//! 2. Blanket-impl `RecordBackendDyn` for all `T: RecordBackend`
//! 3. `BoxRecordBackend` wraps `Box<dyn RecordBackendDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};

use mnemo_types::error::RepositoryError;
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Record, RecordId, TagSet, VersionEntry};

use super::backend::RecordBackend;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`RecordBackend`] with boxed futures.
pub trait RecordBackendDyn: Send + Sync {
    fn name(&self) -> &str;

    fn insert_boxed<'a>(
        &'a self,
        record: &'a Record,
        history: &'a [VersionEntry],
    ) -> BoxFuture<'a, ()>;

    fn get_boxed<'a>(&'a self, id: &'a RecordId) -> BoxFuture<'a, Record>;

    fn update_tags_boxed<'a>(
        &'a self,
        id: &'a RecordId,
        expected_version: u32,
        tags: &'a TagSet,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Record>;

    fn list_boxed<'a>(&'a self, query: &'a ListQuery) -> BoxFuture<'a, Vec<Record>>;

    fn search_boxed<'a>(&'a self, query: &'a SearchQuery) -> BoxFuture<'a, Vec<Record>>;

    fn stats_boxed(&self) -> BoxFuture<'_, StoreStats>;

    fn history_boxed<'a>(&'a self, id: &'a RecordId) -> BoxFuture<'a, Vec<VersionEntry>>;
}

/// Blanket implementation: any `RecordBackend` automatically implements `RecordBackendDyn`.
impl<T: RecordBackend> RecordBackendDyn for T {
    fn name(&self) -> &str {
        RecordBackend::name(self)
    }

    fn insert_boxed<'a>(
        &'a self,
        record: &'a Record,
        history: &'a [VersionEntry],
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.insert(record, history))
    }

    fn get_boxed<'a>(&'a self, id: &'a RecordId) -> BoxFuture<'a, Record> {
        Box::pin(self.get(id))
    }

    fn update_tags_boxed<'a>(
        &'a self,
        id: &'a RecordId,
        expected_version: u32,
        tags: &'a TagSet,
        at: DateTime<Utc>,
    ) -> BoxFuture<'a, Record> {
        Box::pin(self.update_tags(id, expected_version, tags, at))
    }

    fn list_boxed<'a>(&'a self, query: &'a ListQuery) -> BoxFuture<'a, Vec<Record>> {
        Box::pin(self.list(query))
    }

    fn search_boxed<'a>(&'a self, query: &'a SearchQuery) -> BoxFuture<'a, Vec<Record>> {
        Box::pin(self.search(query))
    }

    fn stats_boxed(&self) -> BoxFuture<'_, StoreStats> {
        Box::pin(self.stats())
    }

    fn history_boxed<'a>(&'a self, id: &'a RecordId) -> BoxFuture<'a, Vec<VersionEntry>> {
        Box::pin(self.history(id))
    }
}

/// Type-erased backend for runtime backend selection.
///
/// Since `RecordBackend` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxRecordBackend` provides equivalent methods that delegate to
/// the inner `RecordBackendDyn` trait object.
pub struct BoxRecordBackend {
    inner: Box<dyn RecordBackendDyn + Send + Sync>,
}

impl BoxRecordBackend {
    /// Wrap a concrete `RecordBackend` in a type-erased box.
    pub fn new<T: RecordBackend + 'static>(backend: T) -> Self {
        Self {
            inner: Box::new(backend),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn insert(
        &self,
        record: &Record,
        history: &[VersionEntry],
    ) -> Result<(), RepositoryError> {
        self.inner.insert_boxed(record, history).await
    }

    pub async fn get(&self, id: &RecordId) -> Result<Record, RepositoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn update_tags(
        &self,
        id: &RecordId,
        expected_version: u32,
        tags: &TagSet,
        at: DateTime<Utc>,
    ) -> Result<Record, RepositoryError> {
        self.inner
            .update_tags_boxed(id, expected_version, tags, at)
            .await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, RepositoryError> {
        self.inner.list_boxed(query).await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, RepositoryError> {
        self.inner.search_boxed(query).await
    }

    pub async fn stats(&self) -> Result<StoreStats, RepositoryError> {
        self.inner.stats_boxed().await
    }

    pub async fn history(&self, id: &RecordId) -> Result<Vec<VersionEntry>, RepositoryError> {
        self.inner.history_boxed(id).await
    }
}

impl std::fmt::Debug for BoxRecordBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxRecordBackend")
            .field("name", &self.name())
            .finish()
    }
}
