//! Cache store backends
//!
//! A store holds exactly one queryable generation at a time. Replacing it is
//! all-or-nothing, and every read is answered from a single generation.

use crate::config::StoreBackend;
use crate::model::{CacheSnapshot, CollectionCounts, LocoEntry, LocoKey, MatchPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

pub mod fixture;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use fixture::FailingStore;
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache contents are corrupt: {0}")]
    Corrupt(String),
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Everything a generation holds for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct LocoRecords {
    pub key: LocoKey,
    pub entry: LocoEntry,
    /// Commit time of the generation the records were read from
    pub last_updated: Option<DateTime<Utc>>,
}

/// Summary of the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationInfo {
    pub last_updated: Option<DateTime<Utc>>,
    pub counts: CollectionCounts,
}

/// Trait for cache storage backends
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Make `snapshot` the current generation, all collections at once
    async fn replace_generation(&self, snapshot: CacheSnapshot) -> Result<(), StoreError>;

    /// All records of `key` from the current generation
    async fn query_exact(&self, key: &LocoKey) -> Result<LocoRecords, StoreError>;

    /// Distinct keys matching an already-normalized `partial`, ascending
    async fn query_keys(
        &self,
        partial: &str,
        policy: MatchPolicy,
        limit: usize,
    ) -> Result<Vec<LocoKey>, StoreError>;

    /// Freshness and size of the current generation
    async fn generation_info(&self) -> Result<GenerationInfo, StoreError>;

    /// Get store backend name
    fn name(&self) -> &'static str;
}

/// Open the store described by `backend`
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn CacheStore>, StoreError> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StoreBackend::Sqlite(config) => {
            let store = SqliteStore::connect(&config.url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StoreBackend::Sqlite(_) => Err(StoreError::Backend(
            "SQLite storage requires the 'sqlite' feature to be enabled".to_string(),
        )),
    }
}
