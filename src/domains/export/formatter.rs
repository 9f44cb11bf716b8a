use crate::domains::export::types::{CellValue, ExportError, ExportResult};
use chrono::{FixedOffset, Offset, Utc};

/// Timestamp pattern shared by every output format.
pub const TIMESTAMP_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// Converts field values into text and carries the delimited-text dialect.
///
/// The formatter is a pure function of its configuration and input: the
/// same value always renders the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowFormatter {
    delimiter: char,
    quote: char,
    offset: FixedOffset,
}

impl Default for RowFormatter {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            offset: Utc.fix(),
        }
    }
}

impl RowFormatter {
    pub fn new(delimiter: char, offset: FixedOffset) -> Self {
        Self {
            delimiter,
            offset,
            ..Self::default()
        }
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Locale-independent text for a value; null renders as empty.
    pub fn format(&self, value: &CellValue) -> String {
        match value {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Integer(i) => i.to_string(),
            CellValue::Decimal(d) => d.to_string(),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Timestamp(ts) => ts
                .with_timezone(&self.offset)
                .format(TIMESTAMP_PATTERN)
                .to_string(),
        }
    }

    /// Delimited-text dialect: a field is quoted only when it contains the
    /// delimiter, the quote character or a line break, and embedded quotes
    /// are doubled. Records end with `\n`.
    pub fn csv_writer_builder(&self) -> ExportResult<csv::WriterBuilder> {
        if !self.delimiter.is_ascii() || !self.quote.is_ascii() {
            return Err(ExportError::Configuration(format!(
                "delimiter {:?} and quote {:?} must be ASCII",
                self.delimiter, self.quote
            )));
        }
        let mut builder = csv::WriterBuilder::new();
        builder
            .delimiter(self.delimiter as u8)
            .quote(self.quote as u8)
            .double_quote(true)
            .quote_style(csv::QuoteStyle::Necessary)
            .terminator(csv::Terminator::Any(b'\n'));
        Ok(builder)
    }
}
