use crate::domains::export::formatter::RowFormatter;
use crate::domains::export::types::*;
use crate::domains::export::writer::{Columns, CountingWriter, FormatWriter, WriterSettings};
use std::io::{BufWriter, Write};
use std::time::Instant;

/// UTF-8 byte order mark so spreadsheet tools pick the right encoding.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

fn csv_error(err: impl std::fmt::Display) -> ExportError {
    ExportError::write(ExportFormat::Csv, err)
}

/// Streaming delimited-text writer.
///
/// Each page is encoded with the formatter's dialect into a reusable buffer
/// and then handed to the buffered sink, so only one page of encoded rows is
/// ever held.
pub struct CsvExportWriter<W: Write> {
    inner: CountingWriter<BufWriter<W>>,
    dialect: csv::WriterBuilder,
    formatter: RowFormatter,
    field_keys: Vec<String>,
    encoded: Vec<u8>,
    stats: ExportStats,
    start_time: Instant,
}

impl<W: Write> CsvExportWriter<W> {
    pub fn new(writer: W, columns: Columns<'_>, settings: &WriterSettings) -> ExportResult<Self> {
        let mut csv = Self {
            inner: CountingWriter::new(BufWriter::new(writer)),
            dialect: settings.formatter.csv_writer_builder()?,
            formatter: settings.formatter,
            field_keys: columns.field_keys.to_vec(),
            encoded: Vec::new(),
            stats: ExportStats::default(),
            start_time: Instant::now(),
        };
        csv.write_header(columns.headers)?;
        Ok(csv)
    }

    fn write_header(&mut self, headers: &[String]) -> ExportResult<()> {
        self.inner.write_all(UTF8_BOM).map_err(csv_error)?;

        self.encoded.clear();
        {
            let mut wtr = self.dialect.from_writer(&mut self.encoded);
            wtr.write_record(headers).map_err(csv_error)?;
            wtr.flush().map_err(csv_error)?;
        }
        self.inner.write_all(&self.encoded).map_err(csv_error)
    }
}

impl<W: Write> FormatWriter for CsvExportWriter<W> {
    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }

    fn write_page(&mut self, page: &[Row]) -> ExportResult<()> {
        self.encoded.clear();
        {
            let mut wtr = self.dialect.from_writer(&mut self.encoded);
            for row in page {
                let fields = row.project(&self.field_keys).map(|value| self.formatter.format(value));
                wtr.write_record(fields).map_err(csv_error)?;
            }
            wtr.flush().map_err(csv_error)?;
        }
        self.inner.write_all(&self.encoded).map_err(csv_error)?;
        self.stats.rows_written += page.len() as u64;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> ExportResult<ExportStats> {
        self.inner.flush().map_err(csv_error)?;

        self.stats.bytes_written = self.inner.bytes_written();
        self.stats.duration_ms = self.start_time.elapsed().as_millis() as u64;
        Ok(self.stats.clone())
    }

    fn abort(self: Box<Self>) {
        // into_parts hands back the sink without flushing what is still buffered
        let (_sink, unflushed) = self.inner.into_inner().into_parts();
        log::debug!(
            "Discarded {} buffered csv bytes",
            unflushed.map(|bytes| bytes.len()).unwrap_or(0)
        );
    }
}
