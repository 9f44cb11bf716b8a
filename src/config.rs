use crate::domains::export::formatter::RowFormatter;
use crate::domains::export::service::{ExportOrchestrator, DEFAULT_PAGE_SIZE};
use crate::domains::export::types::{ExportError, ExportResult};
use crate::domains::export::writer::WriterSettings;
use crate::domains::export::writers::xlsx_writer::validate_sheet_name;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Export presentation and paging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub page_size: u32,
    pub delimiter: char,
    /// Offset of the canonical timezone timestamps are rendered in
    pub utc_offset_secs: i32,
    pub sheet_name: String,
    pub title: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            delimiter: ',',
            utc_offset_secs: 0,
            sheet_name: "Archives".to_string(),
            title: "Archive Records".to_string(),
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> ExportResult<()> {
        if self.page_size == 0 {
            return Err(ExportError::Configuration("page size must be at least 1".to_string()));
        }
        if !self.delimiter.is_ascii() || matches!(self.delimiter, '"' | '\n' | '\r') {
            return Err(ExportError::Configuration(format!(
                "delimiter {:?} must be a single ASCII character other than a quote or newline",
                self.delimiter
            )));
        }
        self.offset()?;
        validate_sheet_name(&self.sheet_name)
    }

    pub fn offset(&self) -> ExportResult<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_secs).ok_or_else(|| {
            ExportError::Configuration(format!("UTC offset {}s is out of range", self.utc_offset_secs))
        })
    }

    pub fn writer_settings(&self) -> ExportResult<WriterSettings> {
        self.validate()?;
        Ok(WriterSettings {
            formatter: RowFormatter::new(self.delimiter, self.offset()?),
            sheet_name: self.sheet_name.clone(),
            title: self.title.clone(),
        })
    }

    pub fn orchestrator(&self) -> ExportResult<ExportOrchestrator> {
        ExportOrchestrator::new(self.page_size, self.writer_settings()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// 0 keeps entries until invalidated
    pub default_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { default_ttl_secs: 1800 }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Option<Duration> {
        match self.default_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Application configuration, read from `ARCHIVE_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub export: ExportSettings,
    pub cache: CacheSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            export: ExportSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> ExportResult<Self> {
        if let Err(e) = dotenv::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Missing keys keep
    /// their defaults; malformed values are rejected.
    pub fn from_lookup<F>(lookup: F) -> ExportResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("ARCHIVE_DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(size) = lookup("ARCHIVE_EXPORT_PAGE_SIZE") {
            config.export.page_size = parse_number("ARCHIVE_EXPORT_PAGE_SIZE", &size)?;
        }
        if let Some(delimiter) = lookup("ARCHIVE_EXPORT_DELIMITER") {
            config.export.delimiter = parse_delimiter(&delimiter)?;
        }
        if let Some(offset) = lookup("ARCHIVE_EXPORT_UTC_OFFSET_SECS") {
            config.export.utc_offset_secs = parse_number("ARCHIVE_EXPORT_UTC_OFFSET_SECS", &offset)?;
        }
        if let Some(name) = lookup("ARCHIVE_EXPORT_SHEET_NAME") {
            config.export.sheet_name = name;
        }
        if let Some(title) = lookup("ARCHIVE_EXPORT_TITLE") {
            config.export.title = title;
        }
        if let Some(ttl) = lookup("ARCHIVE_CACHE_DEFAULT_TTL_SECS") {
            config.cache.default_ttl_secs = parse_number("ARCHIVE_CACHE_DEFAULT_TTL_SECS", &ttl)?;
        }

        config.export.validate()?;
        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ExportResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ExportError::Configuration(format!("{}={:?}: {}", key, value, e)))
}

fn parse_delimiter(value: &str) -> ExportResult<char> {
    if value == "\\t" {
        return Ok('\t');
    }
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ExportError::Configuration(format!(
            "ARCHIVE_EXPORT_DELIMITER must be one character, got {:?}",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.export.page_size, 1000);
        assert_eq!(config.cache.default_ttl(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = AppConfig::from_lookup(lookup(&[
            ("ARCHIVE_EXPORT_PAGE_SIZE", "250"),
            ("ARCHIVE_EXPORT_DELIMITER", ";"),
            ("ARCHIVE_EXPORT_UTC_OFFSET_SECS", "28800"),
            ("ARCHIVE_CACHE_DEFAULT_TTL_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.export.page_size, 250);
        assert_eq!(config.cache.default_ttl(), None);

        let settings = config.export.writer_settings().unwrap();
        assert_eq!(settings.formatter.delimiter(), ';');
        assert_eq!(settings.formatter.offset().local_minus_utc(), 28800);
        assert_eq!(config.export.orchestrator().unwrap().page_size(), 250);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for pairs in [
            [("ARCHIVE_EXPORT_PAGE_SIZE", "0")],
            [("ARCHIVE_EXPORT_PAGE_SIZE", "many")],
            [("ARCHIVE_EXPORT_DELIMITER", "\"")],
            [("ARCHIVE_EXPORT_DELIMITER", ";;")],
            [("ARCHIVE_EXPORT_UTC_OFFSET_SECS", "90000")],
            [("ARCHIVE_EXPORT_SHEET_NAME", "bad/name")],
        ] {
            assert!(
                matches!(AppConfig::from_lookup(lookup(&pairs)), Err(ExportError::Configuration(_))),
                "{:?} accepted",
                pairs
            );
        }
    }

    #[test]
    fn test_tab_delimiter_escape() {
        let config = AppConfig::from_lookup(lookup(&[("ARCHIVE_EXPORT_DELIMITER", "\\t")])).unwrap();
        assert_eq!(config.export.delimiter, '\t');
    }
}
