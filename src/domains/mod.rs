pub mod archive;
pub mod cache;
pub mod export;

pub use archive::{ArchiveExportService, ArchiveRecord, SqliteArchiveRepository};
pub use cache::{CacheService, InMemoryCacheStore};
pub use export::{ExportOrchestrator, ExportRequest, RenderedOutput};
