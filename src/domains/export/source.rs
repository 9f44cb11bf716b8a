use crate::domains::export::types::{Page, Row};
use crate::errors::{DomainError, DomainResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Page-oriented access to the rows of one export.
///
/// Pages are 1-indexed. An empty page, or one shorter than `page_size`,
/// means the data is exhausted. Implementations keep no state between calls
/// and must read from a stable snapshot for the duration of one export.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, page_number: u32, page_size: u32) -> DomainResult<Page>;
}

#[async_trait]
impl<T: PageSource + ?Sized> PageSource for Arc<T> {
    async fn fetch(&self, page_number: u32, page_size: u32) -> DomainResult<Page> {
        (**self).fetch(page_number, page_size).await
    }
}

/// Offset of the first row of a 1-indexed page.
pub fn page_offset(page_number: u32, page_size: u32) -> DomainResult<u64> {
    if page_number == 0 || page_size == 0 {
        return Err(DomainError::Internal(format!(
            "invalid page coordinates: page {} of size {}",
            page_number, page_size
        )));
    }
    Ok((page_number as u64 - 1) * page_size as u64)
}

/// Serves pages out of rows already held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecPageSource {
    rows: Arc<Vec<Row>>,
}

impl VecPageSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows: Arc::new(rows) }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl PageSource for VecPageSource {
    async fn fetch(&self, page_number: u32, page_size: u32) -> DomainResult<Page> {
        let offset = page_offset(page_number, page_size)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.rows.len());
        let end = start.saturating_add(page_size as usize).min(self.rows.len());
        Ok(self.rows[start..end].to_vec())
    }
}
