pub mod types;
pub mod formatter;
pub mod source;
pub mod writer;
pub mod writers;
pub mod progress;
pub mod service;

pub use types::{
    CellValue, ExportError, ExportFormat, ExportRequest, ExportResult, ExportStats, Page,
    RenderedOutput, Row,
};
pub use formatter::RowFormatter;
pub use source::{PageSource, VecPageSource};
pub use writer::{FormatWriter, WriterFactory, WriterSettings};
pub use progress::{
    progress_channel, ChannelProgressSink, NoopProgress, ProgressSink,
    ProgressSnapshot, ProgressTracker,
};
pub use service::{CancelHandle, ExportOrchestrator, ExportSession, ExportState, DEFAULT_PAGE_SIZE};
