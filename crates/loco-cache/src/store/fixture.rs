//! Store wrapper that can be switched into failing
//!
//! Delegates to a [`MemoryStore`] until writes or reads are switched off, then
//! answers with [`StoreError::Backend`]. Used to exercise store failure paths.

use crate::model::{CacheSnapshot, LocoKey, MatchPolicy};
use crate::store::{CacheStore, GenerationInfo, LocoRecords, MemoryStore, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped store, which keeps serving whatever was committed
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Make `replace_generation` fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every query fail until switched back
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("reads switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn replace_generation(&self, snapshot: CacheSnapshot) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes switched off".to_string()));
        }
        self.inner.replace_generation(snapshot).await
    }

    async fn query_exact(&self, key: &LocoKey) -> Result<LocoRecords, StoreError> {
        self.check_reads()?;
        self.inner.query_exact(key).await
    }

    async fn query_keys(
        &self,
        partial: &str,
        policy: MatchPolicy,
        limit: usize,
    ) -> Result<Vec<LocoKey>, StoreError> {
        self.check_reads()?;
        self.inner.query_keys(partial, policy, limit).await
    }

    async fn generation_info(&self) -> Result<GenerationInfo, StoreError> {
        self.check_reads()?;
        self.inner.generation_info().await
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
