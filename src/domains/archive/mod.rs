pub mod types;
pub mod repository;
pub mod service;

pub use types::{default_export_columns, ArchiveQuery, ArchiveRecord, ArchiveRecordRow, ArchiveStatus};
pub use repository::{ArchiveRepository, SqliteArchiveRepository};
pub use service::{ArchiveExportOptions, ArchiveExportService, ArchivePageSource};
