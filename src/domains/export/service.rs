use crate::domains::export::progress::{ProgressSink, ProgressSnapshot, ProgressTracker};
use crate::domains::export::source::PageSource;
use crate::domains::export::types::*;
use crate::domains::export::writer::{Columns, FormatWriter, WriterFactory, WriterSettings};
use futures::stream::{self, Stream};
use serde::Serialize;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Lifecycle of a single-format export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportState {
    NotStarted,
    Fetching,
    Writing,
    Finalizing,
    Completed,
    Failed,
}

/// Shared flag checked between pages. Cancelling affects every session
/// opened from orchestrators holding a clone of the handle.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One format being exported, advanced a page at a time.
///
/// Each call to `next_page` fetches and writes pages until it has one
/// snapshot to report. A full page may turn out to be the last one, so its
/// snapshot is held until the following fetch settles that; the final
/// snapshot is always the 100% one and `processed` strictly increases.
/// Once the session has failed it returns the same error without touching
/// the source or the sink again.
pub struct ExportSession<'a> {
    format: ExportFormat,
    source: &'a dyn PageSource,
    writer: Option<Box<dyn FormatWriter + 'a>>,
    page_size: u32,
    next_page: u32,
    processed: u64,
    pages_fetched: u32,
    state: ExportState,
    tracker: ProgressTracker,
    cancel: CancelHandle,
    held: Option<ProgressSnapshot>,
    terminal: Option<ProgressSnapshot>,
    failure: Option<ExportError>,
    stats: Option<ExportStats>,
}

impl<'a> ExportSession<'a> {
    pub fn format(&self) -> ExportFormat {
        self.format
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn transition(&mut self, next: ExportState) {
        log::debug!("{} export: {:?} -> {:?}", self.format, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: ExportError) -> ExportError {
        log::error!("{} export failed: {}", self.format, err);
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.held = None;
        self.terminal = None;
        self.failure = Some(err.clone());
        self.transition(ExportState::Failed);
        err
    }

    /// Report the next snapshot, or `None` once the export has completed
    /// and every snapshot has been handed out.
    pub async fn next_page(&mut self) -> ExportResult<Option<ProgressSnapshot>> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        if self.state == ExportState::Completed {
            return Ok(self.terminal.take());
        }

        loop {
            let page_number = self.next_page;
            let rows = self.process_page(page_number).await?;
            let terminal = rows < self.page_size as usize;

            if !terminal {
                let snapshot = self.tracker.snapshot(page_number, self.processed, false);
                self.next_page = match page_number.checked_add(1) {
                    Some(next) => next,
                    None => {
                        return Err(self.fail(ExportError::DataSource {
                            format: self.format,
                            page: page_number,
                            message: "page number overflow".to_string(),
                        }))
                    }
                };
                match self.held.replace(snapshot) {
                    Some(previous) => return Ok(Some(previous)),
                    None => continue,
                }
            }

            self.complete()?;
            let last = match self.held.take() {
                // the held full page was the last one with data
                Some(held) if rows == 0 => {
                    return Ok(Some(self.tracker.snapshot(held.page, self.processed, true)))
                }
                Some(held) => held,
                None => return Ok(Some(self.tracker.snapshot(page_number, self.processed, true))),
            };
            self.terminal = Some(self.tracker.snapshot(page_number, self.processed, true));
            return Ok(Some(last));
        }
    }

    /// Fetch and write one page, returning its row count.
    async fn process_page(&mut self, page_number: u32) -> ExportResult<usize> {
        if self.cancel.is_cancelled() {
            return Err(self.fail(ExportError::Cancelled {
                format: self.format,
                page: page_number,
            }));
        }

        self.transition(ExportState::Fetching);
        let page = match self.source.fetch(page_number, self.page_size).await {
            Ok(page) => page,
            Err(e) => {
                return Err(self.fail(ExportError::DataSource {
                    format: self.format,
                    page: page_number,
                    message: e.to_string(),
                }))
            }
        };
        if page.len() > self.page_size as usize {
            return Err(self.fail(ExportError::DataSource {
                format: self.format,
                page: page_number,
                message: format!("returned {} rows for page size {}", page.len(), self.page_size),
            }));
        }

        self.transition(ExportState::Writing);
        let written = match self.writer.as_mut() {
            Some(writer) => writer.write_page(&page),
            None => Err(ExportError::write(self.format, "writer is already closed")),
        };
        if let Err(e) = written {
            return Err(self.fail(e));
        }

        self.processed += page.len() as u64;
        self.pages_fetched += 1;
        Ok(page.len())
    }

    fn complete(&mut self) -> ExportResult<()> {
        self.transition(ExportState::Finalizing);
        let finalized = match self.writer.take() {
            Some(writer) => writer.finalize(),
            None => Err(ExportError::write(self.format, "writer is already closed")),
        };
        let mut stats = match finalized {
            Ok(stats) => stats,
            Err(e) => return Err(self.fail(e)),
        };
        stats.pages_fetched = self.pages_fetched;
        log::info!(
            "{} export completed: {} rows in {} pages, {} bytes",
            self.format,
            stats.rows_written,
            stats.pages_fetched,
            stats.bytes_written
        );
        self.stats = Some(stats);
        self.transition(ExportState::Completed);
        Ok(())
    }

    /// Drive the session to completion, reporting every snapshot to `progress`.
    pub async fn run(mut self, progress: &mut dyn ProgressSink) -> ExportResult<ExportStats> {
        while let Some(snapshot) = self.next_page().await? {
            if let Err(e) = progress.report(&snapshot) {
                return Err(self.fail(e));
            }
        }
        self.finish()
    }

    /// Statistics of a completed session.
    pub fn finish(self) -> ExportResult<ExportStats> {
        if let Some(failure) = self.failure {
            return Err(failure);
        }
        match (self.state, self.stats) {
            (ExportState::Completed, Some(stats)) => Ok(stats),
            (state, _) => Err(ExportError::write(
                self.format,
                format!("export finished in state {:?}", state),
            )),
        }
    }

    /// Turn the session into a lazy, finite stream of snapshots. The stream
    /// ends after the terminal page or at the first error.
    pub fn into_stream(self) -> impl Stream<Item = ExportResult<ProgressSnapshot>> + 'a {
        stream::try_unfold(self, |mut session| async move {
            let next = session.next_page().await?;
            Ok::<_, ExportError>(next.map(|snapshot| (snapshot, session)))
        })
    }
}

/// Drives page-by-page exports and packages their output.
#[derive(Debug, Clone)]
pub struct ExportOrchestrator {
    page_size: u32,
    settings: WriterSettings,
    cancel: CancelHandle,
}

impl ExportOrchestrator {
    pub fn new(page_size: u32, settings: WriterSettings) -> ExportResult<Self> {
        if page_size == 0 {
            return Err(ExportError::Configuration("page size must be at least 1".to_string()));
        }
        Ok(Self {
            page_size,
            settings,
            cancel: CancelHandle::new(),
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Validate the request and open a session writing `format` into `sink`.
    /// The header row is written before this returns.
    pub fn open_session<'a, W: Write + 'a>(
        &self,
        format: ExportFormat,
        request: &ExportRequest,
        source: &'a dyn PageSource,
        sink: W,
    ) -> ExportResult<ExportSession<'a>> {
        request.validate()?;
        let writer = WriterFactory::open(format, Columns::from_request(request), &self.settings, sink)?;
        log::debug!(
            "Opened {} export session: page size {}, expected total {}",
            format,
            self.page_size,
            request.expected_total
        );
        Ok(ExportSession {
            format,
            source,
            writer: Some(writer),
            page_size: self.page_size,
            next_page: 1,
            processed: 0,
            pages_fetched: 0,
            state: ExportState::NotStarted,
            tracker: ProgressTracker::new(format, request.expected_total),
            cancel: self.cancel.clone(),
            held: None,
            terminal: None,
            failure: None,
            stats: None,
        })
    }

    /// Export a single format straight into a caller-owned sink.
    pub async fn export_to<W: Write>(
        &self,
        format: ExportFormat,
        request: &ExportRequest,
        source: &dyn PageSource,
        sink: W,
        progress: &mut dyn ProgressSink,
    ) -> ExportResult<ExportStats> {
        self.open_session(format, request, source, sink)?
            .run(progress)
            .await
    }

    /// Export every supported format named in the request. One format is
    /// returned as is; several are bundled as `<base>.<ext>` entries of a
    /// single ZIP archive. The first failure aborts the whole export.
    pub async fn export(
        &self,
        request: &ExportRequest,
        source: &dyn PageSource,
        progress: &mut dyn ProgressSink,
    ) -> ExportResult<RenderedOutput> {
        request.validate()?;
        let formats = request.resolve_formats()?;

        let mut rendered = Vec::with_capacity(formats.len());
        for format in formats {
            let mut bytes = Vec::new();
            let stats = self
                .export_to(format, request, source, &mut bytes, progress)
                .await?;
            rendered.push((format, bytes, stats));
        }

        if rendered.len() > 1 {
            return bundle_archive(&request.base_name, rendered);
        }
        match rendered.pop() {
            Some((format, bytes, stats)) => Ok(RenderedOutput::new(
                format!("{}.{}", request.base_name, format.file_extension()),
                format.content_type(),
                bytes,
                vec![(format, stats)],
            )),
            None => Err(ExportError::Format("no format was rendered".to_string())),
        }
    }
}

fn bundle_archive(
    base_name: &str,
    rendered: Vec<(ExportFormat, Vec<u8>, ExportStats)>,
) -> ExportResult<RenderedOutput> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut stats = Vec::with_capacity(rendered.len());

    for (format, bytes, format_stats) in rendered {
        let entry = format!("{}.{}", base_name, format.file_extension());
        log::debug!("Adding {} ({} bytes) to export archive", entry, bytes.len());
        zip.start_file(entry.as_str(), options)
            .map_err(|e| ExportError::Bundle(e.to_string()))?;
        zip.write_all(&bytes)
            .map_err(|e| ExportError::Bundle(e.to_string()))?;
        stats.push((format, format_stats));
    }

    let bytes = zip
        .finish()
        .map_err(|e| ExportError::Bundle(e.to_string()))?
        .into_inner();
    let content_type = "application/zip"
        .parse()
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    Ok(RenderedOutput::new(format!("{}.zip", base_name), content_type, bytes, stats))
}
