//! Read-side queries over the store.
//!
//! Results are ordered by recency, never by relevance. Text matching is
//! done by the backends (see `mnemo_types::query::text_matches`).

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mnemo_types::error::StoreError;
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Category, Record, RecordDraft};

use crate::store::Store;

/// Records scanned for a duplicate candidate.
const DUPLICATE_WINDOW: usize = 50;

/// Machine-readable memory export.
#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub generated_at: DateTime<Utc>,
    pub stats: StoreStats,
    pub recent: Vec<Record>,
    /// Sorted union of the recent records' tags.
    pub tags: Vec<String>,
}

pub struct RetrievalEngine {
    store: Arc<Store>,
    summary_recent: usize,
}

impl RetrievalEngine {
    pub fn new(store: Arc<Store>, summary_recent: usize) -> Self {
        Self {
            store,
            summary_recent,
        }
    }

    #[tracing::instrument(skip(self), fields(text = query.text.as_deref()))]
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, StoreError> {
        self.store.search(query).await
    }

    /// Records tagged `tag`, newest first.
    pub async fn topic(&self, tag: &str, limit: usize) -> Result<Vec<Record>, StoreError> {
        self.store
            .search(&SearchQuery {
                tags: vec![tag.to_string()],
                limit,
                ..Default::default()
            })
            .await
    }

    /// The `limit` most recent records.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Record>, StoreError> {
        self.store.list(&ListQuery::with_limit(limit)).await
    }

    /// Compact text digest: stats plus the most recent records.
    pub async fn export_summary(&self) -> Result<String, StoreError> {
        let stats = self.store.stats().await?;
        let recent = self.recent(self.summary_recent).await?;
        Ok(render_summary(&stats, &recent))
    }

    /// Stats, recent records and their tags, ready to serialize.
    pub async fn export_snapshot(&self) -> Result<MemorySnapshot, StoreError> {
        let stats = self.store.stats().await?;
        let recent = self.recent(self.summary_recent).await?;
        let tags: BTreeSet<String> = recent
            .iter()
            .flat_map(|r| r.tags.iter().map(str::to_string))
            .collect();
        Ok(MemorySnapshot {
            generated_at: Utc::now(),
            stats,
            recent,
            tags: tags.into_iter().collect(),
        })
    }

    /// Most recent same-category record whose summary is at least
    /// `threshold` similar (token-set Jaccard) to the draft's.
    #[tracing::instrument(skip(self, draft), fields(category = %draft.category))]
    pub async fn find_duplicate(
        &self,
        draft: &RecordDraft,
        threshold: f64,
    ) -> Result<Option<Record>, StoreError> {
        let wanted = tokens(&draft.content.summary);
        if wanted.is_empty() {
            return Ok(None);
        }
        let candidates = self
            .store
            .search(&SearchQuery {
                category: Some(draft.category),
                limit: DUPLICATE_WINDOW,
                ..Default::default()
            })
            .await?;

        Ok(candidates
            .into_iter()
            .find(|r| jaccard(&wanted, &tokens(&r.content.summary)) >= threshold))
    }
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn render_summary(stats: &StoreStats, recent: &[Record]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Memory: {} record(s)", stats.total);
    let counts: Vec<String> = Category::ALL
        .iter()
        .map(|c| format!("{c}: {}", stats.count(*c)))
        .collect();
    let _ = writeln!(out, "  {}", counts.join(", "));
    let _ = writeln!(out, "  distinct tags: {}", stats.distinct_tags);
    if let Some(at) = stats.last_updated {
        let _ = writeln!(out, "  last updated: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if recent.is_empty() {
        return out;
    }
    let _ = writeln!(out, "Recent:");
    for record in recent {
        let _ = write!(out, "  - {} [{}] {}", record.id, record.category, record.content.summary);
        if !record.tags.is_empty() {
            let _ = write!(out, " #{}", record.tags.iter().collect::<Vec<_>>().join(" #"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BoxRecordBackend, StorePolicy};
    use crate::testing::MemoryBackend;
    use mnemo_types::record::{RecordContent, TagSet};

    fn engine() -> (RetrievalEngine, Arc<Store>) {
        let store = Arc::new(Store::new(
            BoxRecordBackend::new(MemoryBackend::new("primary")),
            None,
            StorePolicy::default(),
        ));
        (RetrievalEngine::new(Arc::clone(&store), 2), store)
    }

    fn draft(category: Category, summary: &str, tags: &[&str]) -> RecordDraft {
        let mut draft = RecordDraft::new(
            category,
            RecordContent {
                summary: summary.to_string(),
                ..Default::default()
            },
        );
        draft.tags = tags.iter().copied().collect::<TagSet>();
        draft
    }

    #[tokio::test]
    async fn test_topic_returns_tagged_records_newest_first() {
        let (engine, store) = engine();
        let a = store.write(draft(Category::Learning, "first", &["rust"])).await.unwrap();
        store.write(draft(Category::Learning, "other", &["python"])).await.unwrap();
        let c = store.write(draft(Category::Insight, "third", &["rust", "async"])).await.unwrap();

        let hits = engine.topic("rust", 10).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![c.id, a.id]);
    }

    #[tokio::test]
    async fn test_search_matches_terms() {
        let (engine, store) = engine();
        store
            .write(draft(Category::Learning, "Switched to asyncio event loop", &[]))
            .await
            .unwrap();
        store.write(draft(Category::Learning, "Unrelated", &[])).await.unwrap();

        let hits = engine.search(&SearchQuery::text("ASYNC loop")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(engine.search(&SearchQuery::text("async missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_summary_lists_recent() {
        let (engine, store) = engine();
        store.write(draft(Category::Learning, "one", &[])).await.unwrap();
        store.write(draft(Category::Pattern, "two", &["x"])).await.unwrap();
        store.write(draft(Category::Insight, "three", &[])).await.unwrap();

        let digest = engine.export_summary().await.unwrap();
        assert!(digest.starts_with("Memory: 3 record(s)"));
        assert!(digest.contains("learning: 1"));
        assert!(digest.contains("three"));
        assert!(digest.contains("two #x"));
        // summary_recent is 2
        assert!(!digest.contains("] one"));
    }

    #[tokio::test]
    async fn test_export_snapshot_unions_tags() {
        let (engine, store) = engine();
        store.write(draft(Category::Learning, "one", &["b", "a"])).await.unwrap();
        store.write(draft(Category::Learning, "two", &["a", "c"])).await.unwrap();

        let snapshot = engine.export_snapshot().await.unwrap();
        assert_eq!(snapshot.stats.total, 2);
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.tags, vec!["a", "b", "c"]);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["stats"]["total"], 2);
    }

    #[tokio::test]
    async fn test_find_duplicate_respects_category_and_threshold() {
        let (engine, store) = engine();
        let existing = store
            .write(draft(Category::Learning, "The memory hook fires once per session", &[]))
            .await
            .unwrap();

        let same = draft(Category::Learning, "the memory hook fires once per session.", &[]);
        let found = engine.find_duplicate(&same, 0.9).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(existing.id));

        let other_category = draft(Category::Insight, "The memory hook fires once per session", &[]);
        assert!(engine.find_duplicate(&other_category, 0.9).await.unwrap().is_none());

        let different = draft(Category::Learning, "The store retries once", &[]);
        assert!(engine.find_duplicate(&different, 0.5).await.unwrap().is_none());
    }

    #[test]
    fn test_jaccard() {
        let a = tokens("a b c");
        let b = tokens("b c d");
        assert!((jaccard(&a, &b) - 0.5).abs() < f64::EPSILON);
        assert_eq!(jaccard(&BTreeSet::new(), &BTreeSet::new()), 0.0);
    }
}
