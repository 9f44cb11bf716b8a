use crate::domains::archive::{ArchiveExportService, ArchiveRepository, SqliteArchiveRepository};
use crate::domains::cache::{CacheService, CacheStore, InMemoryCacheStore};
use crate::errors::{DomainError, ServiceResult};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;

// Public modules
pub mod config;
pub mod domains;
pub mod errors;

pub use config::AppConfig;

/// Initialize logging. Defaults `RUST_LOG` to `debug` in debug builds and
/// `info` otherwise; safe to call more than once.
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        std::env::set_var("RUST_LOG", "debug");
        #[cfg(not(debug_assertions))]
        std::env::set_var("RUST_LOG", "info");
    }

    // Initialize env_logger if not already initialized
    let _ = env_logger::try_init();
}

// Entry point for initialization
/// Connect to the configured database, prepare the schema and build the
/// archive export service.
pub async fn initialize(config: &AppConfig) -> ServiceResult<ArchiveExportService> {
    init_logging();

    log::info!("Starting initialization");
    log::debug!("Database URL: {}", config.database_url);

    // An in-memory database only lives as long as its single connection
    let max_connections = if config.database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&config.database_url)
        .await
        .map_err(DomainError::from)?;

    let repo = SqliteArchiveRepository::new(pool);
    repo.init_schema().await?;

    let store: Arc<dyn CacheStore> = Arc::new(InMemoryCacheStore::new());
    let cache = CacheService::new(store, config.cache.default_ttl());
    let orchestrator = config.export.orchestrator()?;

    let repo: Arc<dyn ArchiveRepository> = Arc::new(repo);
    log::info!("Initialization complete");
    Ok(ArchiveExportService::new(repo, cache, orchestrator))
}

/// In-memory log capture shared by the crate's tests. Installing it before
/// anything calls `init_logging` keeps `env_logger` from claiming the global
/// logger.
#[cfg(test)]
pub(crate) mod test_log {
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::{Mutex, Once};

    static RECORDS: Mutex<Vec<(Level, String)>> = Mutex::new(Vec::new());
    static INSTALL: Once = Once::new();
    static LOGGER: CaptureLogger = CaptureLogger;

    struct CaptureLogger;

    impl Log for CaptureLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if let Ok(mut records) = RECORDS.lock() {
                records.push((record.level(), record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    pub(crate) fn install() {
        INSTALL.call_once(|| {
            if log::set_logger(&LOGGER).is_ok() {
                log::set_max_level(LevelFilter::Debug);
            }
        });
    }

    pub(crate) fn contains(level: Level, needle: &str) -> bool {
        RECORDS
            .lock()
            .map(|records| records.iter().any(|(l, message)| *l == level && message.contains(needle)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::archive::{ArchiveExportOptions, ArchiveQuery, ArchiveRecord};
    use crate::domains::export::NoopProgress;

    #[tokio::test]
    async fn test_initialize_with_defaults() {
        test_log::install();
        let service = initialize(&AppConfig::default()).await.unwrap();
        assert_eq!(service.count(&ArchiveQuery::default()).await.unwrap(), 0);

        service
            .create(&ArchiveRecord::new("C-0001", "Council minutes, 1971"))
            .await
            .unwrap();

        let options = ArchiveExportOptions::default()
            .with_formats(["csv"])
            .with_base_name("council");
        let output = service
            .export(&ArchiveQuery::default(), &options, &mut NoopProgress)
            .await
            .unwrap();

        let text = String::from_utf8_lossy(&output.bytes);
        assert!(text.contains("\"Council minutes, 1971\""));
        assert_eq!(output.stats[0].1.rows_written, 1);
    }
}
