use crate::domains::export::types::Row;
use crate::errors::{DomainError, DomainResult, ValidationError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Custody status of an archive record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    InStock,
    Borrowed,
    Destroyed,
}

impl ArchiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveStatus::InStock => "in_stock",
            ArchiveStatus::Borrowed => "borrowed",
            ArchiveStatus::Destroyed => "destroyed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(ArchiveStatus::InStock),
            "borrowed" => Some(ArchiveStatus::Borrowed),
            "destroyed" => Some(ArchiveStatus::Destroyed),
            _ => None,
        }
    }

    /// Label shown in exported files
    pub fn label(&self) -> &'static str {
        match self {
            ArchiveStatus::InStock => "In Stock",
            ArchiveStatus::Borrowed => "Borrowed",
            ArchiveStatus::Destroyed => "Destroyed",
        }
    }
}

/// Archive record entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: Uuid,
    pub archive_no: String,
    pub title: String,
    pub category: Option<String>,
    pub fonds_no: Option<String>,
    pub retention_period: Option<String>,
    pub storage_location: Option<String>,
    pub page_count: Option<i64>,
    pub status: ArchiveStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArchiveRecord {
    pub fn new(archive_no: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            archive_no: archive_no.into(),
            title: title.into(),
            category: None,
            fonds_no: None,
            retention_period: None,
            storage_location: None,
            page_count: None,
            status: ArchiveStatus::InStock,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.archive_no.trim().is_empty() {
            return Err(ValidationError::required("archive_no").into());
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::required("title").into());
        }
        if matches!(self.page_count, Some(n) if n < 0) {
            return Err(ValidationError::invalid_value("page_count", "must not be negative").into());
        }
        Ok(())
    }

    /// Project the record into an export row keyed by camelCase field names.
    pub fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id.to_string())
            .with("archiveNo", self.archive_no.as_str())
            .with("title", self.title.as_str())
            .with("category", self.category.clone())
            .with("fondsNo", self.fonds_no.clone())
            .with("retentionPeriod", self.retention_period.clone())
            .with("storageLocation", self.storage_location.clone())
            .with("pageCount", self.page_count)
            .with("status", self.status.label())
            .with("createdAt", self.created_at)
            .with("updatedAt", self.updated_at)
    }
}

/// Default export layout as (header, field key) pairs.
pub fn default_export_columns() -> Vec<(String, String)> {
    [
        ("Archive No", "archiveNo"),
        ("Title", "title"),
        ("Category", "category"),
        ("Fonds No", "fondsNo"),
        ("Retention Period", "retentionPeriod"),
        ("Storage Location", "storageLocation"),
        ("Pages", "pageCount"),
        ("Status", "status"),
        ("Created", "createdAt"),
    ]
    .iter()
    .map(|(header, key)| (header.to_string(), key.to_string()))
    .collect()
}

/// Filter applied to list, count and export queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveQuery {
    /// Matched against title and archive number
    pub keyword: Option<String>,
    pub category: Option<String>,
    pub status: Option<ArchiveStatus>,
}

impl ArchiveQuery {
    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Stable key used to cache results of this query
    pub fn cache_key(&self, prefix: &str) -> String {
        format!(
            "{}{}|{}|{}",
            prefix,
            self.keyword().unwrap_or(""),
            self.category.as_deref().unwrap_or(""),
            self.status.map(|s| s.as_str()).unwrap_or("")
        )
    }
}

/// ArchiveRecordRow - SQLite row representation for mapping from database
#[derive(Debug, Clone, FromRow)]
pub struct ArchiveRecordRow {
    pub id: String,
    pub archive_no: String,
    pub title: String,
    pub category: Option<String>,
    pub fonds_no: Option<String>,
    pub retention_period: Option<String>,
    pub storage_location: Option<String>,
    pub page_count: Option<i64>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ArchiveRecordRow {
    pub fn from_entity(record: &ArchiveRecord) -> Self {
        Self {
            id: record.id.to_string(),
            archive_no: record.archive_no.clone(),
            title: record.title.clone(),
            category: record.category.clone(),
            fonds_no: record.fonds_no.clone(),
            retention_period: record.retention_period.clone(),
            storage_location: record.storage_location.clone(),
            page_count: record.page_count,
            status: record.status.as_str().to_string(),
            created_at: format_timestamp(&record.created_at),
            updated_at: format_timestamp(&record.updated_at),
        }
    }

    pub fn into_entity(self) -> DomainResult<ArchiveRecord> {
        let parse_datetime = |s: &str, field_name: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    DomainError::Validation(ValidationError::format(
                        field_name,
                        &format!("Invalid RFC3339 format: {}", s),
                    ))
                })
        };

        Ok(ArchiveRecord {
            id: Uuid::parse_str(&self.id).map_err(|_| DomainError::InvalidUuid(self.id.clone()))?,
            status: ArchiveStatus::parse(&self.status).ok_or_else(|| {
                DomainError::Validation(ValidationError::invalid_value(
                    "status",
                    &format!("unknown status '{}'", self.status),
                ))
            })?,
            created_at: parse_datetime(&self.created_at, "created_at")?,
            updated_at: parse_datetime(&self.updated_at, "updated_at")?,
            archive_no: self.archive_no,
            title: self.title,
            category: self.category,
            fonds_no: self.fonds_no,
            retention_period: self.retention_period,
            storage_location: self.storage_location,
            page_count: self.page_count,
        })
    }
}

/// Fixed-width UTC timestamp so that text ordering matches time ordering.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::types::CellValue;
    use chrono::SubsecRound;

    #[test]
    fn test_row_uses_export_keys() {
        let mut record = ArchiveRecord::new("A-001", "Land survey, 1962");
        record.page_count = Some(12);
        let row = record.to_row();
        assert_eq!(row.get("archiveNo"), &CellValue::Text("A-001".into()));
        assert_eq!(row.get("pageCount"), &CellValue::Integer(12));
        assert_eq!(row.get("category"), &CellValue::Null);
        assert_eq!(row.get("status"), &CellValue::Text("In Stock".into()));
        assert_eq!(row.get("createdAt"), &CellValue::Timestamp(record.created_at));
    }

    #[test]
    fn test_default_columns_resolve_on_rows() {
        let row = ArchiveRecord::new("A-002", "Deeds").to_row();
        let columns = default_export_columns();
        assert_eq!(columns[0], ("Archive No".to_string(), "archiveNo".to_string()));
        for key in ["archiveNo", "title", "status", "createdAt"] {
            assert!(columns.iter().any(|(_, k)| k == key));
            assert!(!row.get(key).is_null(), "{} missing", key);
        }
    }

    #[test]
    fn test_row_mapping_round_trip() {
        let mut record = ArchiveRecord::new("A-003", "Minutes");
        record.status = ArchiveStatus::Borrowed;
        record.created_at = Utc::now().trunc_subsecs(3);
        record.updated_at = record.created_at;
        let back = ArchiveRecordRow::from_entity(&record).into_entity().unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_bad_status_rejected() {
        let mut row = ArchiveRecordRow::from_entity(&ArchiveRecord::new("A-004", "Maps"));
        row.status = "lost".into();
        assert!(matches!(row.into_entity(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_validate_requires_archive_no() {
        let record = ArchiveRecord::new(" ", "Untitled");
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_cache_key_ignores_blank_keyword() {
        let blank = ArchiveQuery { keyword: Some("  ".into()), ..Default::default() };
        assert_eq!(blank.cache_key("count:"), ArchiveQuery::default().cache_key("count:"));
    }
}
