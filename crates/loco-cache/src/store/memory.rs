//! In-memory cache store
//!
//! The current generation is an `Arc<CacheSnapshot>` published through a
//! `watch` channel. Replacing it swaps the `Arc`; readers clone the `Arc` once
//! and answer the whole query from that immutable value, so a reader sees
//! either the old generation or the new one and never a mix.

use crate::model::{CacheSnapshot, LocoKey, MatchPolicy};
use crate::store::{CacheStore, GenerationInfo, LocoRecords, StoreError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct MemoryStore {
    current: Arc<watch::Sender<Arc<CacheSnapshot>>>,
}

impl MemoryStore {
    /// Create a store holding the empty generation
    pub fn new() -> Self {
        let (current, _) = watch::channel(Arc::new(CacheSnapshot::empty()));
        Self {
            current: Arc::new(current),
        }
    }

    /// Handle on the current generation
    pub fn snapshot(&self) -> Arc<CacheSnapshot> {
        Arc::clone(&self.current.borrow())
    }

    /// Watch generation swaps
    pub fn subscribe(&self) -> watch::Receiver<Arc<CacheSnapshot>> {
        self.current.subscribe()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn replace_generation(&self, snapshot: CacheSnapshot) -> Result<(), StoreError> {
        self.current.send_replace(Arc::new(snapshot));
        Ok(())
    }

    async fn query_exact(&self, key: &LocoKey) -> Result<LocoRecords, StoreError> {
        let snapshot = self.snapshot();
        Ok(LocoRecords {
            key: key.clone(),
            entry: snapshot.entry(key).cloned().unwrap_or_default(),
            last_updated: snapshot.last_updated(),
        })
    }

    async fn query_keys(
        &self,
        partial: &str,
        policy: MatchPolicy,
        limit: usize,
    ) -> Result<Vec<LocoKey>, StoreError> {
        Ok(self.snapshot().keys_matching(partial, policy, limit))
    }

    async fn generation_info(&self) -> Result<GenerationInfo, StoreError> {
        let snapshot = self.snapshot();
        Ok(GenerationInfo {
            last_updated: snapshot.last_updated(),
            counts: snapshot.counts(),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DetailRecord, SnapshotBuilder};
    use chrono::Utc;

    fn key(raw: &str) -> LocoKey {
        LocoKey::parse(raw).unwrap()
    }

    fn generation(shed: &str) -> CacheSnapshot {
        let mut builder = SnapshotBuilder::new();
        builder.add_details(
            key("27865"),
            vec![DetailRecord {
                field: "Shed".to_string(),
                value: shed.to_string(),
            }],
        );
        builder.finish(Utc::now())
    }

    #[tokio::test]
    async fn test_memory_store_starts_empty() {
        let store = MemoryStore::new();

        let info = store.generation_info().await.unwrap();
        assert!(info.last_updated.is_none());

        let records = store.query_exact(&key("27865")).await.unwrap();
        assert!(records.entry.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_replace_swaps_whole_generation() {
        let store = MemoryStore::new();
        store.replace_generation(generation("BIA")).await.unwrap();

        let held = store.snapshot();
        store.replace_generation(generation("TKD")).await.unwrap();

        // A handle taken before the swap keeps reading its own generation.
        assert_eq!(held.entry(&key("27865")).unwrap().details[0].value, "BIA");

        let records = store.query_exact(&key("27865")).await.unwrap();
        assert_eq!(records.entry.details[0].value, "TKD");
        assert!(records.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_memory_store_subscribers_see_swaps() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store.replace_generation(generation("BIA")).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().key_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_query_keys() {
        let store = MemoryStore::new();
        store.replace_generation(generation("BIA")).await.unwrap();

        assert_eq!(
            store.query_keys("786", MatchPolicy::Contains, 5).await.unwrap(),
            vec![key("27865")]
        );
        assert!(store
            .query_keys("786", MatchPolicy::Prefix, 5)
            .await
            .unwrap()
            .is_empty());
    }
}
