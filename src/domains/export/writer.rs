use crate::domains::export::formatter::RowFormatter;
use crate::domains::export::types::*;
use crate::domains::export::writers::{CsvExportWriter, PdfExportWriter, XlsxExportWriter};
use std::io::{self, Write};

/// A format-specific writer for one export.
///
/// The header row is written when the writer is opened. Each call to
/// `write_page` consumes one page and keeps none of its rows afterwards.
/// `finalize` completes the file, flushes the sink and reports statistics;
/// a writer that never saw a page still produces a valid header-only file.
/// `abort` ends the writer after a failure.
pub trait FormatWriter {
    fn format(&self) -> ExportFormat;

    fn write_page(&mut self, page: &[Row]) -> ExportResult<()>;

    fn finalize(self: Box<Self>) -> ExportResult<ExportStats>;

    /// Give up on the file. Nothing further may reach the sink, including
    /// bytes a writer still holds in a buffer. Writers that only touch the
    /// sink in `finalize` have nothing to discard.
    fn abort(self: Box<Self>) {}
}

/// Presentation settings shared by all writers of one export.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub formatter: RowFormatter,
    /// Worksheet name for spreadsheet output
    pub sheet_name: String,
    /// Title printed above the table in document output
    pub title: String,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            formatter: RowFormatter::default(),
            sheet_name: "Archives".to_string(),
            title: "Archive Records".to_string(),
        }
    }
}

/// Column layout handed to a writer on open.
#[derive(Debug, Clone, Copy)]
pub struct Columns<'a> {
    pub headers: &'a [String],
    pub field_keys: &'a [String],
}

impl<'a> Columns<'a> {
    pub fn from_request(request: &'a ExportRequest) -> Self {
        Self {
            headers: &request.headers,
            field_keys: &request.field_keys,
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Writer factory for creating format-specific writers
pub struct WriterFactory;

impl WriterFactory {
    /// Open a writer for `format` over `sink`, writing the header row.
    pub fn open<'a, W: Write + 'a>(
        format: ExportFormat,
        columns: Columns<'_>,
        settings: &WriterSettings,
        sink: W,
    ) -> ExportResult<Box<dyn FormatWriter + 'a>> {
        log::debug!("Opening {} writer with {} columns", format, columns.len());
        let writer: Box<dyn FormatWriter + 'a> = match format {
            ExportFormat::Csv => Box::new(CsvExportWriter::new(sink, columns, settings)?),
            ExportFormat::Xlsx => Box::new(XlsxExportWriter::new(sink, columns, settings)?),
            ExportFormat::Pdf => Box::new(PdfExportWriter::new(sink, columns, settings)?),
        };
        Ok(writer)
    }
}

/// Sink wrapper that counts the bytes passed through it.
pub struct CountingWriter<W: Write> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
