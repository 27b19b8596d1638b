//! Record types for Mnemo.
//!
//! A `Record` is one persisted unit of distilled knowledge: the summary,
//! topics, learnings, snippets and decisions extracted from a conversation,
//! filed under one of four fixed categories and indexed by tags.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Knowledge category of a record.
///
/// Fixed at creation; each category maps to its own storage partition.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Insight,
    Learning,
    Pattern,
    #[default]
    ContextSnapshot,
}

impl Category {
    /// Every category, in partition order.
    pub const ALL: [Category; 4] = [
        Category::Insight,
        Category::Learning,
        Category::Pattern,
        Category::ContextSnapshot,
    ];

    /// Directory name of the storage partition for this category.
    pub fn partition(&self) -> &'static str {
        match self {
            Category::Insight => "insights",
            Category::Learning => "learnings",
            Category::Pattern => "patterns",
            Category::ContextSnapshot => "context_history",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Insight => write!(f, "insight"),
            Category::Learning => write!(f, "learning"),
            Category::Pattern => write!(f, "pattern"),
            Category::ContextSnapshot => write!(f, "context_snapshot"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts the canonical names and the partition directory names
    /// (`insights`, `learnings`, `patterns`, `context_history`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "insight" | "insights" => Ok(Category::Insight),
            "learning" | "learnings" => Ok(Category::Learning),
            "pattern" | "patterns" => Ok(Category::Pattern),
            "context_snapshot" | "context_history" | "context" => Ok(Category::ContextSnapshot),
            other => Err(format!("invalid category: '{other}'")),
        }
    }
}

/// Unique, time-sortable record identifier assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

/// Set of normalized tags that remembers insertion order for display.
///
/// Tags are trimmed and lower-cased on the way in; empty tags are dropped
/// and duplicates ignored. Equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(Vec<String>);

impl TagSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Normalize a raw tag. Returns `None` for blank input.
    pub fn normalize(tag: &str) -> Option<String> {
        let tag = tag.trim().to_lowercase();
        if tag.is_empty() { None } else { Some(tag) }
    }

    /// Insert a tag. Returns `true` if it was not already present.
    pub fn insert(&mut self, tag: &str) -> bool {
        match Self::normalize(tag) {
            Some(tag) if !self.0.contains(&tag) => {
                self.0.push(tag);
                true
            }
            _ => false,
        }
    }

    /// Remove a tag. Returns `true` if it was present.
    pub fn remove(&mut self, tag: &str) -> bool {
        let Some(tag) = Self::normalize(tag) else {
            return false;
        };
        let before = self.0.len();
        self.0.retain(|t| *t != tag);
        self.0.len() != before
    }

    pub fn contains(&self, tag: &str) -> bool {
        Self::normalize(tag).is_some_and(|tag| self.0.contains(&tag))
    }

    /// Whether any of `tags` is in the set.
    pub fn contains_any<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.contains(t.as_ref()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags in sorted order (stable representation for comparison and display).
    pub fn sorted(&self) -> Vec<String> {
        let mut tags = self.0.clone();
        tags.sort();
        tags
    }
}

impl PartialEq for TagSet {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|t| other.0.contains(t))
    }
}

impl Eq for TagSet {}

impl From<Vec<String>> for TagSet {
    fn from(tags: Vec<String>) -> Self {
        tags.iter().map(String::as_str).collect()
    }
}

impl From<TagSet> for Vec<String> {
    fn from(tags: TagSet) -> Self {
        tags.0
    }
}

impl<'a> FromIterator<&'a str> for TagSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl<'a> Extend<&'a str> for TagSet {
    fn extend<I: IntoIterator<Item = &'a str>>(&mut self, iter: I) {
        for tag in iter {
            self.insert(tag);
        }
    }
}

/// A code snippet captured from a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    /// Language from the code fence, if one was given.
    #[serde(default)]
    pub language_hint: Option<String>,
    pub text: String,
}

/// A decision made during a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub choice: String,
    #[serde(default)]
    pub rationale: String,
}

/// Structured payload of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContent {
    pub summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub code_snippets: Vec<CodeSnippet>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
}

impl RecordContent {
    /// Lower-cased text that full-text queries match against:
    /// summary, key topics, learnings and decision choices.
    pub fn search_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(
            1 + self.key_topics.len() + self.learnings.len() + self.decisions.len(),
        );
        parts.push(&self.summary);
        parts.extend(self.key_topics.iter().map(String::as_str));
        parts.extend(self.learnings.iter().map(String::as_str));
        parts.extend(self.decisions.iter().map(|d| d.choice.as_str()));
        parts.join("\n").to_lowercase()
    }
}

/// Scalar metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Int(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

/// Open string-to-scalar mapping attached to a record.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Metadata key set on records that were written to the secondary backend.
pub const META_DEGRADED: &str = "degraded";
/// Metadata key naming the backend a degraded record landed on.
pub const META_BACKEND: &str = "backend";

/// A record before the store has assigned its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub category: Category,
    pub tags: TagSet,
    pub content: RecordContent,
    pub transcript_length: u64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl RecordDraft {
    pub fn new(category: Category, content: RecordContent) -> Self {
        Self {
            category,
            tags: TagSet::new(),
            content,
            transcript_length: 0,
            metadata: Metadata::new(),
        }
    }
}

/// A committed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub category: Category,
    pub tags: TagSet,
    pub content: RecordContent,
    pub transcript_length: u64,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// Starts at 1; every tag patch increments it.
    pub version: u32,
}

impl Record {
    /// Materialize a draft with a store-assigned identity.
    pub fn from_draft(draft: RecordDraft, id: RecordId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            category: draft.category,
            tags: draft.tags,
            content: draft.content,
            transcript_length: draft.transcript_length,
            metadata: draft.metadata,
            created_at,
            version: 1,
        }
    }

    /// Whether this record was written to the secondary backend in degraded mode.
    pub fn is_degraded(&self) -> bool {
        matches!(self.metadata.get(META_DEGRADED), Some(MetadataValue::Bool(true)))
    }

    /// Mark the record as a degraded-mode write on `backend`.
    pub fn mark_degraded(&mut self, backend: &str) {
        self.metadata
            .insert(META_DEGRADED.to_string(), MetadataValue::Bool(true));
        self.metadata
            .insert(META_BACKEND.to_string(), MetadataValue::Text(backend.to_string()));
    }

    /// Whether the record's text matches every term of `query`.
    pub fn matches_text(&self, query: &str) -> bool {
        crate::query::text_matches(&self.content.search_text(), query)
    }
}

/// Kind of change recorded in the version history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOp {
    Create,
    UpdateTags,
}

impl fmt::Display for VersionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOp::Create => write!(f, "create"),
            VersionOp::UpdateTags => write!(f, "update_tags"),
        }
    }
}

impl FromStr for VersionOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(VersionOp::Create),
            "update_tags" => Ok(VersionOp::UpdateTags),
            other => Err(format!("invalid version op: '{other}'")),
        }
    }
}

/// One entry in a record's append-only version history.
///
/// Carries the tag set as it stood after the operation so the history can be
/// replayed to any point without consulting the materialized state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub record_id: RecordId,
    pub version: u32,
    pub op: VersionOp,
    pub tags: TagSet,
    pub timestamp: DateTime<Utc>,
}

impl VersionEntry {
    /// The `create` entry for a freshly committed record.
    pub fn create(record: &Record) -> Self {
        Self {
            record_id: record.id.clone(),
            version: record.version,
            op: VersionOp::Create,
            tags: record.tags.clone(),
            timestamp: record.created_at,
        }
    }

    /// The `update_tags` entry for a record after a patch.
    pub fn update_tags(record: &Record, timestamp: DateTime<Utc>) -> Self {
        Self {
            record_id: record.id.clone(),
            version: record.version,
            op: VersionOp::UpdateTags,
            tags: record.tags.clone(),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> Record {
        let mut draft = RecordDraft::new(
            Category::Learning,
            RecordContent {
                summary: "Discovered that tokio::time::timeout drops the inner future".to_string(),
                key_topics: vec!["tokio".to_string(), "Async".to_string()],
                learnings: vec!["Cancellation happens at the next await point".to_string()],
                decisions: vec![Decision {
                    choice: "Wrap remote writes in a timeout".to_string(),
                    rationale: "Never hang the caller".to_string(),
                }],
                ..Default::default()
            },
        );
        draft.tags = ["tokio", "async"].into_iter().collect();
        Record::from_draft(draft, RecordId::from("20261019T101500000-0000"), Utc::now())
    }

    #[test]
    fn test_category_roundtrip() {
        for cat in Category::ALL {
            let parsed: Category = cat.to_string().parse().unwrap();
            assert_eq!(cat, parsed);
        }
    }

    #[test]
    fn test_category_accepts_partition_names() {
        assert_eq!("learnings".parse::<Category>().unwrap(), Category::Learning);
        assert_eq!(
            "context_history".parse::<Category>().unwrap(),
            Category::ContextSnapshot
        );
        assert!("memories".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde() {
        let json = serde_json::to_string(&Category::ContextSnapshot).unwrap();
        assert_eq!(json, "\"context_snapshot\"");
        let parsed: Category = serde_json::from_str("\"pattern\"").unwrap();
        assert_eq!(parsed, Category::Pattern);
    }

    #[test]
    fn test_tag_set_normalizes_and_dedups() {
        let mut tags = TagSet::new();
        assert!(tags.insert(" Python "));
        assert!(!tags.insert("python"));
        assert!(!tags.insert("   "));
        assert!(tags.insert("async"));
        assert_eq!(tags.iter().collect::<Vec<_>>(), vec!["python", "async"]);
        assert!(tags.contains("PYTHON"));
    }

    #[test]
    fn test_tag_set_equality_ignores_order() {
        let a: TagSet = ["a", "b"].into_iter().collect();
        let b: TagSet = ["b", "a"].into_iter().collect();
        let c: TagSet = ["a"].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_tag_set_deserialize_dedups() {
        let tags: TagSet = serde_json::from_str(r#"["Rust", "rust", "cli"]"#).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(serde_json::to_string(&tags).unwrap(), r#"["rust","cli"]"#);
    }

    #[test]
    fn test_tag_set_remove() {
        let mut tags: TagSet = ["a", "b"].into_iter().collect();
        assert!(tags.remove("A"));
        assert!(!tags.remove("a"));
        assert_eq!(tags.sorted(), vec!["b".to_string()]);
    }

    #[test]
    fn test_metadata_value_untagged_serde() {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), "hook".into());
        meta.insert("degraded".to_string(), true.into());
        meta.insert("turns".to_string(), 42i64.into());
        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"degraded":true,"source":"hook","turns":42}"#);
        let parsed: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let record = sample_record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"category\":\"learning\""));
        let parsed: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_search_text_covers_indexed_fields() {
        let record = sample_record();
        let text = record.content.search_text();
        assert!(text.contains("discovered"));
        assert!(text.contains("async"));
        assert!(text.contains("cancellation"));
        assert!(text.contains("wrap remote writes"));
        // Rationales are not indexed.
        assert!(!text.contains("never hang"));
    }

    #[test]
    fn test_mark_degraded() {
        let mut record = sample_record();
        assert!(!record.is_degraded());
        record.mark_degraded("local");
        assert!(record.is_degraded());
        assert_eq!(
            record.metadata.get(META_BACKEND),
            Some(&MetadataValue::Text("local".to_string()))
        );
    }

    #[test]
    fn test_version_entry_create_snapshots_tags() {
        let record = sample_record();
        let entry = VersionEntry::create(&record);
        assert_eq!(entry.version, 1);
        assert_eq!(entry.op, VersionOp::Create);
        assert_eq!(entry.tags, record.tags);
        assert_eq!(entry.timestamp, record.created_at);
    }
}
