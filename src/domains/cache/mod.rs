pub mod types;
pub mod repository;
pub mod service;

pub use types::{CacheEntry, CacheError, CacheResult};
pub use repository::{CacheStore, InMemoryCacheStore};
pub use service::CacheService;
