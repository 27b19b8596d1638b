//! List/search query types and store statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{Category, Record, TagSet};

/// Default page size for list and search queries.
pub const DEFAULT_LIMIT: usize = 20;

/// Filter for `Store::list`.
///
/// `tags` is match-any: a record qualifies if it carries at least one of them.
/// An empty tag filter matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            category: None,
            tags: Vec::new(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl ListQuery {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            limit,
            offset,
            ..Default::default()
        }
    }

    /// Normalized tag filter (trimmed, lower-cased, blanks dropped).
    pub fn normalized_tags(&self) -> Vec<String> {
        self.tags.iter().filter_map(|t| TagSet::normalize(t)).collect()
    }

    /// Whether a record passes the category and tag filters.
    pub fn matches(&self, record: &Record) -> bool {
        if self.category.is_some_and(|c| c != record.category) {
            return false;
        }
        let tags = self.normalized_tags();
        tags.is_empty() || record.tags.contains_any(&tags)
    }
}

/// Full-text query for `Store::search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Whitespace-separated terms; every term must match. `None` lists by filters only.
    pub text: Option<String>,
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: usize,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: None,
            category: None,
            tags: Vec::new(),
            limit: DEFAULT_LIMIT,
        }
    }
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Query terms, lower-cased. Empty when there is no text or only whitespace.
    pub fn terms(&self) -> Vec<String> {
        self.text.as_deref().map(query_terms).unwrap_or_default()
    }

    /// The category and tag part of the query as a list filter.
    pub fn as_list_query(&self) -> ListQuery {
        ListQuery {
            category: self.category,
            tags: self.tags.clone(),
            limit: self.limit,
            offset: 0,
        }
    }

    /// Whether a record satisfies every part of the query.
    pub fn matches(&self, record: &Record) -> bool {
        if !self.as_list_query().matches(record) {
            return false;
        }
        match self.text.as_deref() {
            Some(text) => record.matches_text(text),
            None => true,
        }
    }
}

/// Split a query into lower-cased whitespace-separated terms.
pub fn query_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Every term of `query` occurs as a substring of `haystack` (case-insensitive).
pub fn text_matches(haystack: &str, query: &str) -> bool {
    let haystack = haystack.to_lowercase();
    query_terms(query).iter().all(|term| haystack.contains(term))
}

/// Aggregate store statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: u64,
    /// Count per category; every category is present, zero when empty.
    pub per_category: BTreeMap<Category, u64>,
    pub distinct_tags: u64,
    /// Creation time of the newest record.
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for StoreStats {
    fn default() -> Self {
        Self {
            total: 0,
            per_category: Category::ALL.iter().map(|c| (*c, 0)).collect(),
            distinct_tags: 0,
            last_updated: None,
        }
    }
}

impl StoreStats {
    pub fn count(&self, category: Category) -> u64 {
        self.per_category.get(&category).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordContent, RecordDraft, RecordId};

    fn record(category: Category, tags: &[&str], summary: &str) -> Record {
        let mut draft = RecordDraft::new(
            category,
            RecordContent {
                summary: summary.to_string(),
                key_topics: vec!["asyncio".to_string()],
                ..Default::default()
            },
        );
        draft.tags = tags.iter().copied().collect();
        Record::from_draft(draft, RecordId::from("20261019T000000000-0000"), Utc::now())
    }

    #[test]
    fn test_list_query_tags_match_any() {
        let r = record(Category::Learning, &["python", "async"], "x");
        let query = ListQuery {
            tags: vec!["rust".to_string(), "Python".to_string()],
            ..Default::default()
        };
        assert!(query.matches(&r));

        let query = ListQuery {
            tags: vec!["rust".to_string()],
            ..Default::default()
        };
        assert!(!query.matches(&r));
    }

    #[test]
    fn test_list_query_category_filter() {
        let r = record(Category::Pattern, &[], "x");
        let mut query = ListQuery::default();
        assert!(query.matches(&r));
        query.category = Some(Category::Insight);
        assert!(!query.matches(&r));
    }

    #[test]
    fn test_text_matches_all_terms_substring() {
        let hay = "Discovered that asyncio event loops are single threaded";
        assert!(text_matches(hay, "async LOOP"));
        assert!(!text_matches(hay, "async tokio"));
        // Empty query matches everything.
        assert!(text_matches(hay, "   "));
    }

    #[test]
    fn test_search_query_matches_topics() {
        let r = record(Category::Insight, &[], "Event loop notes");
        assert!(SearchQuery::text("async").matches(&r));
        assert!(!SearchQuery::text("threads").matches(&r));
    }

    #[test]
    fn test_stats_default_has_every_category() {
        let stats = StoreStats::default();
        assert_eq!(stats.per_category.len(), 4);
        assert_eq!(stats.count(Category::ContextSnapshot), 0);
    }
}
