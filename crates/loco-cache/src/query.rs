//! Query service: exact lookup and autocomplete over the current generation
//!
//! Reads only ever go to the store; nothing here starts or waits for a sync.

use crate::config::QueryConfig;
use crate::model::{
    normalize_key_text, DetailRecord, FailureRecord, LocoKey, ModificationRecord, ScheduleRecord,
};
use crate::store::{CacheStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cache unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

/// Everything known about one locomotive, read from a single generation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocoSummary {
    pub loco_no: LocoKey,
    pub details: Vec<DetailRecord>,
    pub schedules: Vec<ScheduleRecord>,
    pub failures: Vec<FailureRecord>,
    pub modifications: Vec<ModificationRecord>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn CacheStore>,
    config: QueryConfig,
}

impl QueryService {
    pub fn new(store: Arc<dyn CacheStore>, config: QueryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Look up one locomotive.
    ///
    /// `Ok(None)` means the key has no records in any collection.
    pub async fn lookup(&self, raw_key: &str) -> Result<Option<LocoSummary>, QueryError> {
        let key = LocoKey::parse(raw_key)
            .ok_or_else(|| QueryError::InvalidInput(format!("'{}' is not a loco number", raw_key.trim())))?;

        let records = self.store.query_exact(&key).await?;
        if records.entry.is_empty() {
            debug!(loco_no = %key, "lookup found no records");
            return Ok(None);
        }

        let last_updated = records.last_updated.ok_or_else(|| {
            StoreError::Corrupt(format!("records for {key} without a generation timestamp"))
        })?;

        let entry = records.entry;
        Ok(Some(LocoSummary {
            loco_no: records.key,
            details: entry.details,
            schedules: entry.schedules,
            failures: entry.failures,
            modifications: entry.modifications,
            last_updated,
        }))
    }

    /// Keys matching `partial` under the configured policy, ascending.
    ///
    /// At most `min(limit, max_suggestions)` keys are returned.
    pub async fn suggest(&self, partial: &str, limit: usize) -> Result<Vec<LocoKey>, QueryError> {
        let partial = normalize_key_text(partial);
        if partial.is_empty() {
            return Err(QueryError::InvalidInput("empty partial key".to_string()));
        }

        let limit = limit.min(self.config.max_suggestions);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let keys = self
            .store
            .query_keys(&partial, self.config.match_policy, limit)
            .await?;
        Ok(keys)
    }
}
