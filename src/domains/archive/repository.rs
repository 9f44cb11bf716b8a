use crate::domains::archive::types::{ArchiveQuery, ArchiveRecord, ArchiveRecordRow};
use crate::domains::export::source::page_offset;
use crate::errors::{DbError, DomainResult};
use async_trait::async_trait;
use sqlx::{query, QueryBuilder, Sqlite, SqlitePool};

/// Table definition used by `SqliteArchiveRepository::init_schema`
pub const ARCHIVES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS archives (
    id TEXT PRIMARY KEY NOT NULL,
    archive_no TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    category TEXT,
    fonds_no TEXT,
    retention_period TEXT,
    storage_location TEXT,
    page_count INTEGER,
    status TEXT NOT NULL DEFAULT 'in_stock',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_archives_created ON archives (created_at, id);
"#;

/// Trait defining archive repository operations
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    async fn insert(&self, record: &ArchiveRecord) -> DomainResult<()>;

    /// One 1-indexed page of records matching `filter`, oldest first.
    async fn find_page(
        &self,
        filter: &ArchiveQuery,
        page: u32,
        page_size: u32,
    ) -> DomainResult<Vec<ArchiveRecord>>;

    async fn count(&self, filter: &ArchiveQuery) -> DomainResult<u64>;
}

/// SQLite implementation for ArchiveRepository
#[derive(Debug, Clone)]
pub struct SqliteArchiveRepository {
    pool: SqlitePool,
}

impl SqliteArchiveRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> DomainResult<()> {
        sqlx::raw_sql(ARCHIVES_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(())
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ArchiveQuery) {
        builder.push(" WHERE 1 = 1");
        if let Some(keyword) = filter.keyword() {
            let pattern = format!("%{}%", escape_like(keyword));
            builder
                .push(" AND (title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR archive_no LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(category) = &filter.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
    }
}

/// Match `%`, `_` and `\` in a keyword literally.
fn escape_like(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl ArchiveRepository for SqliteArchiveRepository {
    async fn insert(&self, record: &ArchiveRecord) -> DomainResult<()> {
        record.validate()?;
        let row = ArchiveRecordRow::from_entity(record);
        query(
            r#"
            INSERT INTO archives (
                id, archive_no, title, category, fonds_no, retention_period,
                storage_location, page_count, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.id)
        .bind(row.archive_no)
        .bind(row.title)
        .bind(row.category)
        .bind(row.fonds_no)
        .bind(row.retention_period)
        .bind(row.storage_location)
        .bind(row.page_count)
        .bind(row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from)?;
        Ok(())
    }

    async fn find_page(
        &self,
        filter: &ArchiveQuery,
        page: u32,
        page_size: u32,
    ) -> DomainResult<Vec<ArchiveRecord>> {
        let offset = page_offset(page, page_size)?;
        let offset = i64::try_from(offset).map_err(|_| DbError::Query(format!("offset {} out of range", offset)))?;

        let mut builder = QueryBuilder::new("SELECT * FROM archives");
        Self::push_filters(&mut builder, filter);
        builder
            .push(" ORDER BY created_at, id LIMIT ")
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder
            .build_query_as::<ArchiveRecordRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::from)?;

        log::debug!("Fetched {} archive rows for page {} (size {})", rows.len(), page, page_size);
        rows.into_iter().map(ArchiveRecordRow::into_entity).collect()
    }

    async fn count(&self, filter: &ArchiveQuery) -> DomainResult<u64> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM archives");
        Self::push_filters(&mut builder, filter);

        let total: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::from)?;
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domains::archive::types::ArchiveStatus;
    use chrono::{Duration, TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    pub(crate) async fn seeded_repository(n: usize) -> SqliteArchiveRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteArchiveRepository::new(pool);
        repo.init_schema().await.unwrap();

        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        for i in 0..n {
            let mut record = ArchiveRecord::new(format!("A-{:04}", i), format!("Record {}", i));
            record.created_at = base + Duration::minutes(i as i64);
            record.updated_at = record.created_at;
            record.category = Some(if i % 2 == 0 { "deeds" } else { "maps" }.to_string());
            if i % 5 == 0 {
                record.status = ArchiveStatus::Borrowed;
            }
            repo.insert(&record).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn test_pages_follow_creation_order() {
        let repo = seeded_repository(7).await;
        let all = ArchiveQuery::default();

        let first = repo.find_page(&all, 1, 3).await.unwrap();
        let third = repo.find_page(&all, 3, 3).await.unwrap();
        let beyond = repo.find_page(&all, 4, 3).await.unwrap();

        let numbers: Vec<&str> = first.iter().map(|r| r.archive_no.as_str()).collect();
        assert_eq!(numbers, vec!["A-0000", "A-0001", "A-0002"]);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].archive_no, "A-0006");
        assert!(beyond.is_empty());
    }

    #[tokio::test]
    async fn test_filters_apply_to_count_and_pages() {
        let repo = seeded_repository(10).await;

        let maps = ArchiveQuery { category: Some("maps".into()), ..Default::default() };
        assert_eq!(repo.count(&maps).await.unwrap(), 5);

        let borrowed = ArchiveQuery { status: Some(ArchiveStatus::Borrowed), ..Default::default() };
        let page = repo.find_page(&borrowed, 1, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|r| r.status == ArchiveStatus::Borrowed));

        let keyword = ArchiveQuery { keyword: Some("A-000".into()), ..Default::default() };
        assert_eq!(repo.count(&keyword).await.unwrap(), 10);
        let keyword = ArchiveQuery { keyword: Some("Record 3".into()), ..Default::default() };
        assert_eq!(repo.count(&keyword).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keyword_wildcards_match_literally() {
        let repo = seeded_repository(0).await;
        for (no, title) in [("A_1", "Survey 100% complete"), ("AB1", "Survey 1000 sheets"), ("A\\1", "Plain")] {
            repo.insert(&ArchiveRecord::new(no, title)).await.unwrap();
        }

        let underscore = ArchiveQuery { keyword: Some("A_1".into()), ..Default::default() };
        let found = repo.find_page(&underscore, 1, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].archive_no, "A_1");

        let percent = ArchiveQuery { keyword: Some("100%".into()), ..Default::default() };
        assert_eq!(repo.count(&percent).await.unwrap(), 1);

        let backslash = ArchiveQuery { keyword: Some("A\\1".into()), ..Default::default() };
        assert_eq!(repo.count(&backslash).await.unwrap(), 1);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[tokio::test]
    async fn test_page_zero_rejected() {
        let repo = seeded_repository(1).await;
        assert!(repo.find_page(&ArchiveQuery::default(), 0, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_archive_no_rejected() {
        let repo = seeded_repository(1).await;
        let duplicate = ArchiveRecord::new("A-0000", "Copy");
        assert!(repo.insert(&duplicate).await.is_err());
    }
}
