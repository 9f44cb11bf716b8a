use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

/// Export formats supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Delimited text (CSV)
    Csv,
    /// Spreadsheet (Office Open XML workbook)
    Xlsx,
    /// Paginated document
    Pdf,
}

impl ExportFormat {
    /// Resolve a user-facing format name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "xlsx" | "excel" => Some(ExportFormat::Xlsx),
            "pdf" => Some(ExportFormat::Pdf),
            _ => None,
        }
    }

    /// Get file extension for this format
    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> mime::Mime {
        match self {
            ExportFormat::Csv => mime::TEXT_CSV_UTF_8,
            ExportFormat::Pdf => mime::APPLICATION_PDF,
            ExportFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                .parse()
                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_extension())
    }
}

/// A single scalar field value as delivered by a page source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Whether spreadsheet output should store this value as a number.
    pub fn is_numeric(&self) -> bool {
        matches!(self, CellValue::Integer(_) | CellValue::Decimal(_))
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<Decimal> for CellValue {
    fn from(value: Decimal) -> Self {
        CellValue::Decimal(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(value: DateTime<Utc>) -> Self {
        CellValue::Timestamp(value)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CellValue::Null)
    }
}

/// One exported record: field key to value. Missing keys read as null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    fields: HashMap<String, CellValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<CellValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> &CellValue {
        const NULL: &CellValue = &CellValue::Null;
        self.fields.get(key).unwrap_or(NULL)
    }

    /// Project the row onto an ordered list of field keys.
    pub fn project<'a>(&'a self, field_keys: &'a [String]) -> impl Iterator<Item = &'a CellValue> + 'a {
        field_keys.iter().map(move |key| self.get(key))
    }
}

/// An ordered batch of rows returned by one page fetch.
pub type Page = Vec<Row>;

/// High-level request describing what should be exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Column labels, in output order
    pub headers: Vec<String>,
    /// Field keys, positionally paired with `headers`
    pub field_keys: Vec<String>,
    /// Requested format names; unknown names are skipped with a warning
    pub formats: Vec<String>,
    /// Expected row count; may be an estimate, 0 when unknown
    pub expected_total: u64,
    /// File name without extension
    pub base_name: String,
}

impl ExportRequest {
    pub fn new<H, K>(headers: H, field_keys: K) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            field_keys: field_keys.into_iter().map(Into::into).collect(),
            formats: vec!["csv".to_string()],
            expected_total: 0,
            base_name: "export".to_string(),
        }
    }

    pub fn with_formats<F>(mut self, formats: F) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
    {
        self.formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expected_total(mut self, expected_total: u64) -> Self {
        self.expected_total = expected_total;
        self
    }

    pub fn with_base_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = base_name.into();
        self
    }

    /// Check the column layout before any page is fetched.
    pub fn validate(&self) -> ExportResult<()> {
        if self.headers.len() != self.field_keys.len() {
            return Err(ExportError::Configuration(format!(
                "{} headers but {} field keys",
                self.headers.len(),
                self.field_keys.len()
            )));
        }
        if self.headers.is_empty() {
            return Err(ExportError::Configuration("at least one column is required".to_string()));
        }
        if self.base_name.trim().is_empty() || self.base_name.contains(['/', '\\']) {
            return Err(ExportError::Configuration(format!(
                "invalid base name '{}'",
                self.base_name
            )));
        }
        Ok(())
    }

    /// Resolve requested format names, dropping unknown ones with a warning.
    /// Duplicates collapse to their first occurrence.
    pub fn resolve_formats(&self) -> ExportResult<Vec<ExportFormat>> {
        let mut resolved = Vec::with_capacity(self.formats.len());
        for name in &self.formats {
            match ExportFormat::from_name(name) {
                Some(format) if !resolved.contains(&format) => resolved.push(format),
                Some(_) => {}
                None => log::warn!("Skipping unsupported export format '{}'", name),
            }
        }
        if resolved.is_empty() {
            return Err(ExportError::Format(format!(
                "no supported format in request {:?}",
                self.formats
            )));
        }
        Ok(resolved)
    }
}

/// Export statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportStats {
    pub rows_written: u64,
    pub pages_fetched: u32,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

/// Finished export artifact handed back to the caller.
#[derive(Debug, Clone)]
pub struct RenderedOutput {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`
    pub checksum: String,
    /// Per-format statistics, in the order the formats were rendered
    pub stats: Vec<(ExportFormat, ExportStats)>,
}

impl RenderedOutput {
    pub fn new(
        file_name: String,
        content_type: mime::Mime,
        bytes: Vec<u8>,
        stats: Vec<(ExportFormat, ExportStats)>,
    ) -> Self {
        let checksum = hex::encode(Sha256::digest(&bytes));
        Self {
            file_name,
            content_type,
            bytes,
            checksum,
            stats,
        }
    }
}

/// Errors raised by the export pipeline. All of them end the export.
#[derive(Debug, Clone, Error)]
pub enum ExportError {
    #[error("Data source failed on page {page} of {format} export: {message}")]
    DataSource {
        format: ExportFormat,
        page: u32,
        message: String,
    },

    #[error("{format} writer failed: {message}")]
    Write { format: ExportFormat, message: String },

    #[error("Bundling the export archive failed: {0}")]
    Bundle(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Progress sink rejected snapshot: {0}")]
    Progress(String),

    #[error("{format} export cancelled before page {page}")]
    Cancelled { format: ExportFormat, page: u32 },
}

impl ExportError {
    pub(crate) fn write(format: ExportFormat, err: impl std::fmt::Display) -> Self {
        ExportError::Write {
            format,
            message: err.to_string(),
        }
    }
}

pub type ExportResult<T> = Result<T, ExportError>;
