//! SQLite record backend.
//!
//! Implements `RecordBackend` from `mnemo-core`. The record row, its tag
//! index rows and its version rows are written in one transaction on the
//! single-connection writer pool; queries run on the reader pool.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use mnemo_core::store::RecordBackend;
use mnemo_core::store::backend::validate_history;
use mnemo_types::error::RepositoryError;
use mnemo_types::query::{ListQuery, SearchQuery, StoreStats};
use mnemo_types::record::{Category, Record, RecordId, TagSet, VersionEntry, VersionOp};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `RecordBackend`.
pub struct SqliteRecordBackend {
    pool: DatabasePool,
    name: String,
}

impl SqliteRecordBackend {
    pub fn new(pool: DatabasePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_sqlx(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => RepositoryError::Unavailable(e.to_string()),
        sqlx::Error::Database(ref db_err) if db_err.message().contains("locked") => {
            RepositoryError::Unavailable(e.to_string())
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE"))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width, so text order equals time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("encode failed: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what}: {e}")))
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| RepositoryError::Query(e.to_string()))
}

fn sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// LIKE pattern matching `term` anywhere, with wildcards escaped.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn row_to_record(row: &SqliteRow) -> Result<Record, RepositoryError> {
    let category: String = col(row, "category")?;
    let tags: String = col(row, "tags")?;
    let content: String = col(row, "content")?;
    let metadata: String = col(row, "metadata")?;
    let transcript_length: i64 = col(row, "transcript_length")?;
    let version: i64 = col(row, "version")?;
    let created_at: String = col(row, "created_at")?;

    Ok(Record {
        id: RecordId(col(row, "id")?),
        category: category
            .parse::<Category>()
            .map_err(|e| RepositoryError::Query(format!("invalid category: {e}")))?,
        tags: from_json(&tags, "tags")?,
        content: from_json(&content, "content")?,
        transcript_length: u64::try_from(transcript_length).unwrap_or_default(),
        metadata: from_json(&metadata, "metadata")?,
        created_at: parse_datetime(&created_at)?,
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Query(format!("invalid version: {version}")))?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<VersionEntry, RepositoryError> {
    let op: String = col(row, "op")?;
    let tags: String = col(row, "tags")?;
    let version: i64 = col(row, "version")?;
    let timestamp: String = col(row, "timestamp")?;

    Ok(VersionEntry {
        record_id: RecordId(col(row, "record_id")?),
        version: u32::try_from(version)
            .map_err(|_| RepositoryError::Query(format!("invalid version: {version}")))?,
        op: op
            .parse::<VersionOp>()
            .map_err(|e| RepositoryError::Query(format!("invalid op: {e}")))?,
        tags: from_json(&tags, "tags")?,
        timestamp: parse_datetime(&timestamp)?,
    })
}

/// Append category, tag (match-any) and text-term filters to a `WHERE 1=1` query.
fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    category: Option<Category>,
    tags: Vec<String>,
    terms: Vec<String>,
) {
    if let Some(category) = category {
        qb.push(" AND category = ").push_bind(category.to_string());
    }
    if !tags.is_empty() {
        qb.push(" AND id IN (SELECT record_id FROM record_tags WHERE tag IN (");
        {
            let mut separated = qb.separated(", ");
            for tag in tags {
                separated.push_bind(tag);
            }
        }
        qb.push("))");
    }
    for term in terms {
        qb.push(" AND search_text LIKE ")
            .push_bind(like_pattern(&term))
            .push(" ESCAPE '\\'");
    }
}

async fn insert_tag_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    id: &RecordId,
    tags: &TagSet,
) -> Result<(), RepositoryError> {
    for tag in tags.iter() {
        sqlx::query("INSERT INTO record_tags (record_id, tag) VALUES (?, ?)")
            .bind(id.as_str())
            .bind(tag)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;
    }
    Ok(())
}

async fn insert_version_row(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    entry: &VersionEntry,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO record_versions (record_id, version, op, tags, timestamp)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(entry.record_id.as_str())
    .bind(entry.version)
    .bind(entry.op.to_string())
    .bind(to_json(&entry.tags)?)
    .bind(format_datetime(&entry.timestamp))
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx)?;
    Ok(())
}

impl RecordBackend for SqliteRecordBackend {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(skip(self, record, history), fields(backend = %self.name, id = %record.id))]
    async fn insert(&self, record: &Record, history: &[VersionEntry]) -> Result<(), RepositoryError> {
        validate_history(record, history)?;

        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            "INSERT INTO records
                (id, category, tags, content, transcript_length, metadata, search_text, version, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.as_str())
        .bind(record.category.to_string())
        .bind(to_json(&record.tags)?)
        .bind(to_json(&record.content)?)
        .bind(i64::try_from(record.transcript_length).unwrap_or(i64::MAX))
        .bind(to_json(&record.metadata)?)
        .bind(record.content.search_text())
        .bind(record.version)
        .bind(format_datetime(&record.created_at))
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Duplicate(record.id.clone())
            } else {
                map_sqlx(e)
            }
        })?;

        insert_tag_rows(&mut tx, &record.id, &record.tags).await?;
        for entry in history {
            insert_version_row(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Record, RepositoryError> {
        let row = sqlx::query("SELECT * FROM records WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    #[tracing::instrument(skip(self, tags), fields(backend = %self.name, id = %id))]
    async fn update_tags(
        &self,
        id: &RecordId,
        expected_version: u32,
        tags: &TagSet,
        at: DateTime<Utc>,
    ) -> Result<Record, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx)?;

        let current: Option<(i64,)> = sqlx::query_as("SELECT version FROM records WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let Some((current,)) = current else {
            return Err(RepositoryError::NotFound);
        };
        if current != i64::from(expected_version) {
            return Err(RepositoryError::Conflict(format!(
                "expected version {expected_version}, found {current}"
            )));
        }

        let updated = sqlx::query(
            "UPDATE records SET tags = ?, version = version + 1 WHERE id = ? AND version = ?",
        )
        .bind(to_json(tags)?)
        .bind(id.as_str())
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "version {expected_version} moved on"
            )));
        }

        sqlx::query("DELETE FROM record_tags WHERE record_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        insert_tag_rows(&mut tx, id, tags).await?;

        let row = sqlx::query("SELECT * FROM records WHERE id = ?")
            .bind(id.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let record = row_to_record(&row)?;
        insert_version_row(&mut tx, &VersionEntry::update_tags(&record, at)).await?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(record)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, RepositoryError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM records WHERE 1=1");
        push_filters(&mut qb, query.category, query.normalized_tags(), Vec::new());
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(sql_count(query.limit))
            .push(" OFFSET ")
            .push_bind(sql_count(query.offset));

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_record).collect()
    }

    #[tracing::instrument(skip(self, query), fields(backend = %self.name))]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Record>, RepositoryError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM records WHERE 1=1");
        push_filters(
            &mut qb,
            query.category,
            query.as_list_query().normalized_tags(),
            query.terms(),
        );
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(sql_count(query.limit));

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;
        rows.iter().map(row_to_record).collect()
    }

    async fn stats(&self) -> Result<StoreStats, RepositoryError> {
        let mut stats = StoreStats::default();

        let per_category: Vec<(String, i64)> =
            sqlx::query_as("SELECT category, COUNT(*) FROM records GROUP BY category")
                .fetch_all(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
        for (category, count) in per_category {
            let category = category
                .parse::<Category>()
                .map_err(|e| RepositoryError::Query(format!("invalid category: {e}")))?;
            let count = u64::try_from(count).unwrap_or_default();
            stats.per_category.insert(category, count);
            stats.total += count;
        }

        let (distinct_tags,): (i64,) =
            sqlx::query_as("SELECT COUNT(DISTINCT tag) FROM record_tags")
                .fetch_one(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
        stats.distinct_tags = u64::try_from(distinct_tags).unwrap_or_default();

        let (last_updated,): (Option<String>,) =
            sqlx::query_as("SELECT MAX(created_at) FROM records")
                .fetch_one(&self.pool.reader)
                .await
                .map_err(map_sqlx)?;
        stats.last_updated = last_updated.as_deref().map(parse_datetime).transpose()?;

        Ok(stats)
    }

    async fn history(&self, id: &RecordId) -> Result<Vec<VersionEntry>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM record_versions WHERE record_id = ? ORDER BY version ASC")
            .bind(id.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx)?;

        if rows.is_empty() {
            return Err(RepositoryError::NotFound);
        }
        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sqlite::pool::database_url;
    use chrono::TimeZone;
    use mnemo_types::record::{Decision, MetadataValue, RecordContent};

    async fn backend(dir: &tempfile::TempDir) -> SqliteRecordBackend {
        let pool = DatabasePool::new(&database_url(dir.path()), Duration::from_secs(5))
            .await
            .unwrap();
        SqliteRecordBackend::new(pool, "remote")
    }

    fn record(id: &str, category: Category, summary: &str, tags: &[&str], minute: u32) -> Record {
        let mut record = Record {
            id: RecordId::from(id),
            category,
            tags: tags.iter().copied().collect(),
            content: RecordContent {
                summary: summary.to_string(),
                key_topics: tags.iter().map(|t| t.to_string()).collect(),
                decisions: vec![Decision {
                    choice: "use sqlite".to_string(),
                    rationale: "embedded".to_string(),
                }],
                ..Default::default()
            },
            transcript_length: 42,
            metadata: Default::default(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 19, 10, minute, 0).unwrap(),
            version: 1,
        };
        record
            .metadata
            .insert("extractor".to_string(), MetadataValue::Text("heuristic".to_string()));
        record
    }

    async fn put(b: &SqliteRecordBackend, r: &Record) {
        b.insert(r, &[VersionEntry::create(r)]).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        let r = record("r1", Category::Learning, "discovered X", &["python", "async"], 0);
        put(&b, &r).await;

        assert_eq!(b.get(&r.id).await.unwrap(), r);
        assert!(matches!(
            b.get(&RecordId::from("nope")).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_insert() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        let r = record("r1", Category::Insight, "s", &[], 0);
        put(&b, &r).await;
        let err = b.insert(&r, &[VersionEntry::create(&r)]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate(id) if id == r.id));
    }

    #[tokio::test]
    async fn test_invalid_history_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        let r = record("r1", Category::Insight, "s", &[], 0);
        assert!(b.insert(&r, &[]).await.is_err());
        assert!(matches!(b.get(&r.id).await, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_tags_cas_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        let r = record("r1", Category::Pattern, "s", &["a"], 0);
        put(&b, &r).await;

        let tags: TagSet = ["a", "b"].into_iter().collect();
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 11, 0, 0).unwrap();
        let updated = b.update_tags(&r.id, 1, &tags, at).await.unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.tags, tags);

        let stale = b.update_tags(&r.id, 1, &TagSet::new(), at).await.unwrap_err();
        assert!(matches!(stale, RepositoryError::Conflict(_)));

        let history = b.history(&r.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].op, VersionOp::Create);
        assert_eq!(history[1].op, VersionOp::UpdateTags);
        assert_eq!(history[1].tags, tags);
        assert_eq!(history[1].timestamp, at);

        // The tag index follows the patch.
        let hits = b
            .list(&ListQuery {
                tags: vec!["b".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_list_order_filters_and_paging() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        put(&b, &record("r1", Category::Learning, "one", &["rust"], 1)).await;
        put(&b, &record("r2", Category::Insight, "two", &["python"], 2)).await;
        put(&b, &record("r3", Category::Learning, "three", &["rust", "sql"], 3)).await;

        let all = b.list(&ListQuery::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2", "r1"]);

        let learning = b
            .list(&ListQuery {
                category: Some(Category::Learning),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(learning.len(), 2);

        let any = b
            .list(&ListQuery {
                tags: vec!["SQL".to_string(), "python".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = any.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2"]);

        let page = b.list(&ListQuery::page(1, 1)).await.unwrap();
        assert_eq!(page[0].id.as_str(), "r2");
    }

    #[tokio::test]
    async fn test_search_terms_substring_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        put(&b, &record("r1", Category::Learning, "Moved to asyncio loops", &[], 1)).await;
        put(&b, &record("r2", Category::Learning, "100% coverage_goal", &[], 2)).await;

        let hits = b.search(&SearchQuery::text("ASYNC loop")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "r1");

        // Decision choices are searchable.
        assert_eq!(b.search(&SearchQuery::text("sqlite")).await.unwrap().len(), 2);

        // Wildcards are literal.
        assert_eq!(b.search(&SearchQuery::text("100%")).await.unwrap().len(), 1);
        assert!(b.search(&SearchQuery::text("x_y")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        assert_eq!(b.stats().await.unwrap(), StoreStats::default());

        put(&b, &record("r1", Category::Learning, "one", &["a", "b"], 1)).await;
        put(&b, &record("r2", Category::Learning, "two", &["b"], 5)).await;

        let stats = b.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(Category::Learning), 2);
        assert_eq!(stats.count(Category::Insight), 0);
        assert_eq!(stats.distinct_tags, 2);
        assert_eq!(
            stats.last_updated,
            Some(Utc.with_ymd_and_hms(2026, 10, 19, 10, 5, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_history_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let b = backend(&dir).await;
        assert!(matches!(
            b.history(&RecordId::from("nope")).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern("a%b_c\\"), "%a\\%b\\_c\\\\%");
    }
}
