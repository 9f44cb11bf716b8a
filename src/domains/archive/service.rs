use crate::domains::archive::repository::ArchiveRepository;
use crate::domains::archive::types::{default_export_columns, ArchiveQuery, ArchiveRecord};
use crate::domains::cache::{CacheService, CacheStore};
use crate::domains::export::progress::ProgressSink;
use crate::domains::export::service::ExportOrchestrator;
use crate::domains::export::source::PageSource;
use crate::domains::export::types::{ExportRequest, Page, RenderedOutput};
use crate::errors::{DomainResult, ServiceError, ServiceResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const COUNT_KEY_PREFIX: &str = "archive:count:";

/// Serves archive records matching one query as export pages.
#[derive(Clone)]
pub struct ArchivePageSource {
    repo: Arc<dyn ArchiveRepository>,
    filter: ArchiveQuery,
}

impl ArchivePageSource {
    pub fn new(repo: Arc<dyn ArchiveRepository>, filter: ArchiveQuery) -> Self {
        Self { repo, filter }
    }
}

#[async_trait]
impl PageSource for ArchivePageSource {
    async fn fetch(&self, page_number: u32, page_size: u32) -> DomainResult<Page> {
        let records = self.repo.find_page(&self.filter, page_number, page_size).await?;
        Ok(records.iter().map(ArchiveRecord::to_row).collect())
    }
}

/// Column layout and formats for one archive export
#[derive(Debug, Clone)]
pub struct ArchiveExportOptions {
    /// (header, field key) pairs in output order
    pub columns: Vec<(String, String)>,
    pub formats: Vec<String>,
    /// File name without extension; a timestamped name is used when absent
    pub base_name: Option<String>,
}

impl Default for ArchiveExportOptions {
    fn default() -> Self {
        Self {
            columns: default_export_columns(),
            formats: vec!["xlsx".to_string()],
            base_name: None,
        }
    }
}

impl ArchiveExportOptions {
    pub fn with_formats<F>(mut self, formats: F) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
    {
        self.formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = Some(base_name.into());
        self
    }
}

/// Archive records service: record creation and bulk export.
pub struct ArchiveExportService {
    repo: Arc<dyn ArchiveRepository>,
    cache: CacheService<Arc<dyn CacheStore>>,
    count_ttl: Option<Duration>,
    orchestrator: ExportOrchestrator,
}

impl ArchiveExportService {
    pub fn new(
        repo: Arc<dyn ArchiveRepository>,
        cache: CacheService<Arc<dyn CacheStore>>,
        orchestrator: ExportOrchestrator,
    ) -> Self {
        let count_ttl = cache.default_ttl();
        Self {
            repo,
            cache,
            count_ttl,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &ExportOrchestrator {
        &self.orchestrator
    }

    /// Insert a record and drop cached counts it may have changed.
    pub async fn create(&self, record: &ArchiveRecord) -> ServiceResult<()> {
        self.repo.insert(record).await?;
        let dropped = self.cache.invalidate_prefix(COUNT_KEY_PREFIX).await?;
        log::debug!("Created archive {}, invalidated {} cached counts", record.archive_no, dropped);
        Ok(())
    }

    /// Number of records matching `filter`, served from cache when possible.
    pub async fn count(&self, filter: &ArchiveQuery) -> ServiceResult<u64> {
        let key = filter.cache_key(COUNT_KEY_PREFIX);
        let repo = Arc::clone(&self.repo);
        let total = self
            .cache
            .get_or_load(&key, self.count_ttl, || async move { repo.count(filter).await })
            .await?;
        Ok(total)
    }

    /// Export every record matching `filter`.
    pub async fn export(
        &self,
        filter: &ArchiveQuery,
        options: &ArchiveExportOptions,
        progress: &mut dyn ProgressSink,
    ) -> ServiceResult<RenderedOutput> {
        let expected_total = self.count(filter).await?;
        let base_name = options
            .base_name
            .clone()
            .unwrap_or_else(|| format!("archives_{}", Utc::now().format("%Y%m%d_%H%M%S")));

        let request = ExportRequest::new(
            options.columns.iter().map(|(header, _)| header.as_str()),
            options.columns.iter().map(|(_, key)| key.as_str()),
        )
        .with_formats(options.formats.iter().map(String::as_str))
        .with_expected_total(expected_total)
        .with_base_name(base_name);

        log::info!(
            "Exporting {} archive records as {:?} to {}",
            expected_total,
            options.formats,
            request.base_name
        );

        let source = ArchivePageSource::new(Arc::clone(&self.repo), filter.clone());
        self.orchestrator
            .export(&request, &source, progress)
            .await
            .map_err(ServiceError::from)
    }
}
