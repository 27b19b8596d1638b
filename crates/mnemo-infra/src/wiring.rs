//! Assemble backends and the dual-backend `Store` from configuration.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use mnemo_core::store::{BoxRecordBackend, RecordBackend, Store, StorePolicy};
use mnemo_types::config::{BackendKind, MnemoConfig, StoreConfig};
use mnemo_types::error::{RepositoryError, StoreError};
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Record, RecordId, TagSet, VersionEntry};

use crate::file::FileRecordBackend;
use crate::flags::FileFlagStore;
use crate::sqlite::{DatabasePool, SqliteRecordBackend, pool::database_url};

/// Root of the file store.
pub fn local_dir(config: &StoreConfig, data_dir: &Path) -> PathBuf {
    config
        .local_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("records"))
}

/// URL of the relational store.
pub fn remote_url(config: &StoreConfig, data_dir: &Path) -> String {
    config
        .remote_url
        .clone()
        .unwrap_or_else(|| database_url(data_dir))
}

/// Durable flag table at `{data_dir}/flags`.
pub fn flag_store(data_dir: &Path) -> FileFlagStore {
    FileFlagStore::new(data_dir.join("flags"))
}

/// Open one backend by kind. Its name is the kind (`local` / `remote`).
#[tracing::instrument(skip(config, data_dir))]
pub async fn open_backend(
    kind: BackendKind,
    config: &StoreConfig,
    data_dir: &Path,
) -> Result<BoxRecordBackend, RepositoryError> {
    match kind {
        BackendKind::Local => {
            let backend = FileRecordBackend::open(local_dir(config, data_dir), kind.to_string()).await?;
            Ok(BoxRecordBackend::new(backend))
        }
        BackendKind::Remote => {
            let url = remote_url(config, data_dir);
            let pool = DatabasePool::new(&url, config.backend_timeout())
                .await
                .map_err(|e| RepositoryError::Unavailable(format!("cannot open {kind} store: {e}")))?;
            Ok(BoxRecordBackend::new(SqliteRecordBackend::new(pool, kind.to_string())))
        }
    }
}

/// Build the dual-backend store.
///
/// A primary that cannot be opened is kept as an offline placeholder when a
/// secondary exists, so writes divert to the secondary as degraded records.
/// With no usable backend at all the store is unavailable.
pub async fn build_store(config: &MnemoConfig, data_dir: &Path) -> Result<Store, StoreError> {
    let store_config = &config.store;

    let secondary = match store_config.effective_secondary() {
        Some(kind) => match open_backend(kind, store_config, data_dir).await {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::warn!(backend = %kind, error = %e, "secondary store unavailable");
                None
            }
        },
        None => None,
    };

    let primary_kind = store_config.primary;
    let primary = match open_backend(primary_kind, store_config, data_dir).await {
        Ok(backend) => backend,
        Err(e) if secondary.is_some() => {
            tracing::warn!(backend = %primary_kind, error = %e, "primary store offline; using secondary");
            BoxRecordBackend::new(OfflineBackend::new(primary_kind.to_string(), e.to_string()))
        }
        Err(e) => return Err(StoreError::StoreUnavailable(e.to_string())),
    };

    Ok(Store::new(primary, secondary, StorePolicy::from(store_config)))
}

/// Stand-in for a backend that failed to open. Every call is `Unavailable`.
#[derive(Debug)]
pub struct OfflineBackend {
    name: String,
    reason: String,
}

impl OfflineBackend {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }

    fn err(&self) -> RepositoryError {
        RepositoryError::Unavailable(self.reason.clone())
    }
}

impl RecordBackend for OfflineBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, _record: &Record, _history: &[VersionEntry]) -> Result<(), RepositoryError> {
        Err(self.err())
    }

    async fn get(&self, _id: &RecordId) -> Result<Record, RepositoryError> {
        Err(self.err())
    }

    async fn update_tags(
        &self,
        _id: &RecordId,
        _expected_version: u32,
        _tags: &TagSet,
        _at: DateTime<Utc>,
    ) -> Result<Record, RepositoryError> {
        Err(self.err())
    }

    async fn list(&self, _query: &ListQuery) -> Result<Vec<Record>, RepositoryError> {
        Err(self.err())
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<Record>, RepositoryError> {
        Err(self.err())
    }

    async fn stats(&self) -> Result<StoreStats, RepositoryError> {
        Err(self.err())
    }

    async fn history(&self, _id: &RecordId) -> Result<Vec<VersionEntry>, RepositoryError> {
        Err(self.err())
    }
}
