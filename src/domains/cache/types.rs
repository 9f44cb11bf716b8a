use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A cached value together with its expiry. `expires_at == None` never expires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Error, Clone, Serialize)]
pub enum CacheError {
    #[error("Cache value for '{key}' could not be (de)serialized: {message}")]
    Serialization { key: String, message: String },

    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Invalid cache TTL: {0}")]
    InvalidTtl(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
