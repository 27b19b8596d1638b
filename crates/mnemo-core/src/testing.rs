//! In-memory test doubles for the ports defined in this crate.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for the
//! tests of downstream crates.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use mnemo_types::error::{ExtractionError, RepositoryError};
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Record, RecordId, TagSet, VersionEntry};

use crate::capture::coordinator::Confirmer;
use crate::distill::extractor::Extractor;
use crate::store::backend::{
    RecordBackend, compute_stats, page_records, sort_newest_first, validate_history,
};

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<RecordId, Record>,
    history: BTreeMap<RecordId, Vec<VersionEntry>>,
}

struct MemoryInner {
    name: String,
    state: Mutex<MemoryState>,
    available: AtomicBool,
    fail_next: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

/// In-memory backend with switchable availability.
///
/// Clones share state, so a test can keep a handle after boxing one into a store.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                name: name.to_string(),
                state: Mutex::new(MemoryState::default()),
                available: AtomicBool::new(true),
                fail_next: AtomicUsize::new(0),
                latency: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Make every call fail with `Unavailable` (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with `Unavailable`, then recover.
    pub fn fail_next(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock().unwrap() = latency;
    }

    /// Number of calls made against this backend.
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.inner.state.lock().unwrap().records.contains_key(id)
    }

    async fn enter(&self) -> Result<(), RepositoryError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.inner.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(format!("{} is down", self.inner.name)));
        }
        let failed = self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RepositoryError::Unavailable(format!("{} hiccup", self.inner.name)));
        }
        Ok(())
    }

    fn snapshot(&self) -> Vec<Record> {
        self.inner
            .state
            .lock()
            .unwrap()
            .records
            .values()
            .cloned()
            .collect()
    }
}

impl RecordBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn insert(&self, record: &Record, history: &[VersionEntry]) -> Result<(), RepositoryError> {
        self.enter().await?;
        validate_history(record, history)?;
        let mut state = self.inner.state.lock().unwrap();
        if state.records.contains_key(&record.id) {
            return Err(RepositoryError::Duplicate(record.id.clone()));
        }
        state.records.insert(record.id.clone(), record.clone());
        state.history.insert(record.id.clone(), history.to_vec());
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Record, RepositoryError> {
        self.enter().await?;
        self.inner
            .state
            .lock()
            .unwrap()
            .records
            .get(id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn update_tags(
        &self,
        id: &RecordId,
        expected_version: u32,
        tags: &TagSet,
        at: DateTime<Utc>,
    ) -> Result<Record, RepositoryError> {
        self.enter().await?;
        let mut state = self.inner.state.lock().unwrap();
        let record = state.records.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if record.version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "expected version {expected_version}, found {}",
                record.version
            )));
        }
        record.tags = tags.clone();
        record.version += 1;
        let updated = record.clone();
        state
            .history
            .entry(id.clone())
            .or_default()
            .push(VersionEntry::update_tags(&updated, at));
        Ok(updated)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, RepositoryError> {
        self.enter().await?;
        Ok(page_records(self.snapshot(), query))
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, RepositoryError> {
        self.enter().await?;
        let mut hits: Vec<Record> = self
            .snapshot()
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();
        sort_newest_first(&mut hits);
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn stats(&self) -> Result<StoreStats, RepositoryError> {
        self.enter().await?;
        Ok(compute_stats(&self.snapshot()))
    }

    async fn history(&self, id: &RecordId) -> Result<Vec<VersionEntry>, RepositoryError> {
        self.enter().await?;
        self.inner
            .state
            .lock()
            .unwrap()
            .history
            .get(id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }
}

/// One scripted extractor response.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(String),
    Fail(ExtractionError),
    /// Never answers; exercises the distiller timeout.
    Hang,
}

/// Extractor that plays back a script, then repeats a fallback step.
pub struct ScriptedExtractor {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always replies with `payload`.
    pub fn replying(payload: &str) -> Self {
        Self::new(Vec::new(), Step::Reply(payload.to_string()))
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self::new(Vec::new(), Step::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::new(Vec::new(), Step::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn extract(&self, _transcript: &str) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            Step::Reply(payload) => Ok(payload),
            Step::Fail(error) => Err(error),
            Step::Hang => std::future::pending().await,
        }
    }
}

impl<T: Extractor> Extractor for Arc<T> {
    fn name(&self) -> &str {
        T::name(self)
    }

    async fn extract(&self, transcript: &str) -> Result<String, ExtractionError> {
        T::extract(self, transcript).await
    }
}

/// A minimal valid extraction payload with the given summary and topics.
pub fn payload(summary: &str, topics: &[&str]) -> String {
    serde_json::json!({
        "summary": summary,
        "key_topics": topics,
        "action_items": [],
        "learnings": [],
        "code_snippets": [],
        "decisions": [],
    })
    .to_string()
}

/// Confirmer that answers the same way every time, optionally after a delay.
#[derive(Debug, Clone)]
pub struct FixedConfirmer {
    answer: bool,
    delay: Option<Duration>,
    asked: Arc<AtomicUsize>,
}

impl FixedConfirmer {
    pub fn yes() -> Self {
        Self {
            answer: true,
            delay: None,
            asked: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn no() -> Self {
        Self {
            answer: false,
            ..Self::yes()
        }
    }

    /// Answers "yes", but only after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::yes()
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

impl Confirmer for FixedConfirmer {
    async fn confirm(&self, _session_id: &str, _prompt: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answer
    }
}
