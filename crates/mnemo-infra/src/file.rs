//! File-based record backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! history.jsonl                  append-only version log (authoritative)
//! history.lock                   OS lock serializing writers across processes
//! {partition}/{id}.json          materialized record, rewritten atomically
//! ```
//!
//! Every mutation takes an exclusive lock on `history.lock`, reads whatever
//! other handles appended since this one last looked, runs its duplicate and
//! version checks against that state, then appends its entries (the create
//! entry carries the full record), `fsync`s the log and rewrites the
//! materialized file via temp-file + rename. Reads pick up appended lines
//! before answering. A torn final line from an interrupted append is
//! truncated under the lock with a warning.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use mnemo_core::store::RecordBackend;
use mnemo_core::store::backend::{compute_stats, page_records, sort_newest_first, validate_history};
use mnemo_types::error::RepositoryError;
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Category, Record, RecordId, TagSet, VersionEntry, VersionOp};

const LOG_FILE: &str = "history.jsonl";
const LOCK_FILE: &str = "history.lock";

/// One line of `history.jsonl`.
#[derive(Debug, Serialize, Deserialize)]
struct LogLine {
    entry: VersionEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<Record>,
}

/// File-backed implementation of `RecordBackend`.
pub struct FileRecordBackend {
    root: PathBuf,
    name: String,
    records: DashMap<RecordId, Record>,
    history: DashMap<RecordId, Vec<VersionEntry>>,
    /// Byte offset of the log already folded into the maps.
    cursor: Mutex<u64>,
}

fn io_err(e: std::io::Error) -> RepositoryError {
    RepositoryError::Unavailable(e.to_string())
}

impl FileRecordBackend {
    /// Open (or create) a store rooted at `root` and replay its log.
    #[tracing::instrument(skip_all, fields(root = %root.as_ref().display()))]
    pub async fn open(root: impl AsRef<Path>, name: impl Into<String>) -> Result<Self, RepositoryError> {
        let root = root.as_ref().to_path_buf();
        for category in Category::ALL {
            fs::create_dir_all(root.join(category.partition()))
                .await
                .map_err(io_err)?;
        }

        let backend = Self {
            root,
            name: name.into(),
            records: DashMap::new(),
            history: DashMap::new(),
            cursor: Mutex::new(0),
        };
        {
            let mut cursor = backend.cursor.lock().await;
            let _log_lock = backend.lock_log().await?;
            backend.catch_up(&mut cursor, true).await?;
        }
        tracing::debug!(records = backend.records.len(), "file store opened");
        Ok(backend)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    fn record_path(&self, record: &Record) -> PathBuf {
        self.root
            .join(record.category.partition())
            .join(format!("{}.json", record.id))
    }

    /// Block until this handle holds the cross-process writer lock. The lock
    /// is released when the returned file is dropped.
    async fn lock_log(&self) -> Result<std::fs::File, RepositoryError> {
        let path = self.root.join(LOCK_FILE);
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| RepositoryError::Unavailable(format!("lock task failed: {e}")))?
        .map_err(io_err)
    }

    /// Fold log lines past `cursor` into the maps and advance it.
    ///
    /// Stops at a final line that is incomplete or unparseable. With `repair`
    /// (only under the writer lock) that tail is truncated, since no writer
    /// can still be producing it.
    async fn catch_up(&self, cursor: &mut u64, repair: bool) -> Result<(), RepositoryError> {
        let path = self.log_path();
        let mut file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(e)),
        };
        let len = file.metadata().await.map_err(io_err)?.len();
        if len < *cursor {
            return Err(RepositoryError::Query(format!(
                "{} shrank below applied offset {}",
                path.display(),
                cursor
            )));
        }
        if len == *cursor {
            return Ok(());
        }

        file.seek(SeekFrom::Start(*cursor)).await.map_err(io_err)?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail).await.map_err(io_err)?;
        drop(file);

        let mut applied = 0usize;
        let mut torn = false;
        let mut chunks = tail.split_inclusive(|b| *b == b'\n').peekable();
        while let Some(raw) = chunks.next() {
            let complete = raw.ends_with(b"\n");
            let line = raw.trim_ascii();
            if complete && line.is_empty() {
                applied += raw.len();
                continue;
            }
            match serde_json::from_slice::<LogLine>(line) {
                Ok(parsed) if complete => {
                    self.apply(parsed);
                    applied += raw.len();
                }
                result => {
                    if chunks.peek().is_some() {
                        let at = *cursor + applied as u64;
                        *cursor = at;
                        return Err(RepositoryError::Query(format!(
                            "corrupt line in {} at byte {at}",
                            path.display()
                        )));
                    }
                    torn = true;
                    if repair {
                        tracing::warn!(
                            path = %path.display(),
                            parsed = result.is_ok(),
                            "dropping torn final line of version log"
                        );
                    }
                }
            }
        }
        *cursor += applied as u64;

        if torn && repair {
            let file = fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .await
                .map_err(io_err)?;
            file.set_len(*cursor).await.map_err(io_err)?;
            file.sync_all().await.map_err(io_err)?;
        }
        Ok(())
    }

    /// Pick up lines other handles appended since the last look.
    async fn refresh(&self) -> Result<(), RepositoryError> {
        let mut cursor = self.cursor.lock().await;
        self.catch_up(&mut cursor, false).await
    }

    /// Fold one log line into the in-memory state. A second create for a
    /// known id, or an update that does not follow the current version, is
    /// skipped so the first writer wins.
    fn apply(&self, line: LogLine) {
        let LogLine { entry, record } = line;
        match (entry.op, record) {
            (VersionOp::Create, Some(mut record)) => {
                if self.records.contains_key(&record.id) {
                    tracing::warn!(id = %record.id, "duplicate create entry; keeping the first");
                    return;
                }
                record.tags = entry.tags.clone();
                record.version = entry.version;
                self.records.insert(record.id.clone(), record);
            }
            (VersionOp::Create, None) => {
                tracing::warn!(id = %entry.record_id, "create entry without record; skipped");
                return;
            }
            (VersionOp::UpdateTags, _) => match self.records.get_mut(&entry.record_id) {
                Some(mut record) if entry.version == record.version + 1 => {
                    record.tags = entry.tags.clone();
                    record.version = entry.version;
                }
                Some(record) => {
                    tracing::warn!(
                        id = %entry.record_id,
                        version = entry.version,
                        current = record.version,
                        "out-of-sequence update; skipped"
                    );
                    return;
                }
                None => {
                    tracing::warn!(id = %entry.record_id, "update for unknown record; skipped");
                    return;
                }
            },
        }
        self.history.entry(entry.record_id.clone()).or_default().push(entry);
    }

    /// Append encoded lines and return the number of bytes written.
    async fn append(&self, lines: &[LogLine]) -> Result<u64, RepositoryError> {
        let mut buf = Vec::new();
        for line in lines {
            serde_json::to_writer(&mut buf, line)
                .map_err(|e| RepositoryError::Query(format!("encode failed: {e}")))?;
            buf.push(b'\n');
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await
            .map_err(io_err)?;
        file.write_all(&buf).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        Ok(buf.len() as u64)
    }

    async fn materialize(&self, record: &Record) -> Result<(), RepositoryError> {
        let path = self.record_path(record);
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| RepositoryError::Query(format!("encode failed: {e}")))?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(&json).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        fs::rename(&temp_path, &path).await.map_err(io_err)?;
        Ok(())
    }

    fn snapshot(&self) -> Vec<Record> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

impl RecordBackend for FileRecordBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, record, history), fields(backend = %self.name, id = %record.id))]
    async fn insert(&self, record: &Record, history: &[VersionEntry]) -> Result<(), RepositoryError> {
        validate_history(record, history)?;
        let mut cursor = self.cursor.lock().await;
        let _log_lock = self.lock_log().await?;
        self.catch_up(&mut cursor, true).await?;

        if self.records.contains_key(&record.id) {
            return Err(RepositoryError::Duplicate(record.id.clone()));
        }

        let lines: Vec<LogLine> = history
            .iter()
            .map(|entry| LogLine {
                entry: entry.clone(),
                record: (entry.op == VersionOp::Create).then(|| record.clone()),
            })
            .collect();
        *cursor += self.append(&lines).await?;
        self.materialize(record).await?;

        self.records.insert(record.id.clone(), record.clone());
        self.history.insert(record.id.clone(), history.to_vec());
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Record, RepositoryError> {
        self.refresh().await?;
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(RepositoryError::NotFound)
    }

    #[tracing::instrument(skip(self, tags), fields(backend = %self.name, id = %id))]
    async fn update_tags(
        &self,
        id: &RecordId,
        expected_version: u32,
        tags: &TagSet,
        at: DateTime<Utc>,
    ) -> Result<Record, RepositoryError> {
        let mut cursor = self.cursor.lock().await;
        let _log_lock = self.lock_log().await?;
        self.catch_up(&mut cursor, true).await?;

        let mut record = self
            .records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(RepositoryError::NotFound)?;
        if record.version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "expected version {expected_version}, found {}",
                record.version
            )));
        }
        record.tags = tags.clone();
        record.version += 1;
        let entry = VersionEntry::update_tags(&record, at);

        *cursor += self
            .append(&[LogLine {
                entry: entry.clone(),
                record: None,
            }])
            .await?;
        self.materialize(&record).await?;

        self.records.insert(id.clone(), record.clone());
        self.history.entry(id.clone()).or_default().push(entry);
        Ok(record)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, RepositoryError> {
        self.refresh().await?;
        Ok(page_records(self.snapshot(), query))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, RepositoryError> {
        self.refresh().await?;
        let mut hits: Vec<Record> = self
            .records
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        sort_newest_first(&mut hits);
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn stats(&self) -> Result<StoreStats, RepositoryError> {
        self.refresh().await?;
        Ok(compute_stats(&self.snapshot()))
    }

    async fn history(&self, id: &RecordId) -> Result<Vec<VersionEntry>, RepositoryError> {
        self.refresh().await?;
        self.history
            .get(id)
            .map(|h| h.value().clone())
            .ok_or(RepositoryError::NotFound)
    }
}
