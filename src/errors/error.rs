use serde::Serialize;
use thiserror::Error;
use crate::domains::cache::types::CacheError;
use crate::domains::export::types::ExportError;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("DbError", 2)?;
        let kind = match self {
            DbError::Sqlx(_) => "Sqlx",
            DbError::Query(_) => "Query",
            DbError::Other(_) => "Other",
        };
        state.serialize_field("type", kind)?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Manual Clone implementation for DbError
impl Clone for DbError {
    fn clone(&self) -> Self {
        match self {
            DbError::Sqlx(err) => DbError::Other(format!("SQLx error: {}", err)),
            DbError::Query(s) => DbError::Query(s.clone()),
            DbError::Other(s) => DbError::Other(s.clone()),
        }
    }
}

/// Domain-level errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DomainError {
    fn from(error: sqlx::Error) -> Self {
        DomainError::Database(DbError::Sqlx(error))
    }
}

/// Errors surfaced by the archive service facade
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Validation errors
#[derive(Debug, Error, Clone, Serialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required {
        field: String,
    },

    #[error("Field '{field}' contains invalid format: {reason}")]
    Format {
        field: String,
        reason: String,
    },

    #[error("Field '{field}' contains an invalid value: {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        Self::Required {
            field: field.to_string(),
        }
    }

    pub fn format(field: &str, reason: &str) -> Self {
        Self::Format {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_value(field: &str, reason: &str) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::export::types::ExportFormat;

    #[test]
    fn test_db_error_serializes_kind_and_message() {
        let err = DbError::Query("offset out of range".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "Query");
        assert_eq!(json["message"], "Query error: offset out of range");
    }

    #[test]
    fn test_sqlx_error_clones_as_text() {
        let err = DbError::Sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err.clone(), DbError::Other(msg) if msg.starts_with("SQLx error")));
    }

    #[test]
    fn test_service_error_keeps_export_context() {
        let err: ServiceError = ExportError::DataSource {
            format: ExportFormat::Pdf,
            page: 4,
            message: "timeout".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Export error: Data source failed on page 4 of pdf export: timeout"
        );
    }
}
