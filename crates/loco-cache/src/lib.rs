//! # Loco Cache - Locomotive Record Sync & Query
//!
//! This crate keeps a refreshed, indexed copy of the locomotive spreadsheet
//! and answers lookups from it.
//!
//! ## Features
//!
//! - **Atomic Generations**: a refresh becomes visible all at once or not at all
//! - **Multiple Storage Backends**: Memory, SQLite
//! - **Tolerant Normalization**: bad rows are skipped and reported, not fatal
//! - **Single-Flight Sync**: concurrent refresh triggers collapse into one cycle
//! - **Autocomplete**: substring or prefix match over every known loco number
//!
//! ## Example
//!
//! ```rust,no_run
//! use loco_cache::{CsvExportSource, MemoryStore, QueryConfig, QueryService, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let source = CsvExportSource::new("https://docs.google.com", Duration::from_secs(30)).unwrap();
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let engine = SyncEngine::new(SyncConfig::new("sheet-id"), Arc::new(source), store.clone());
//!     engine.trigger_sync().await.unwrap();
//!
//!     let query = QueryService::new(store, QueryConfig::default());
//!     let summary = query.lookup("27865").await.unwrap();
//! }
//! ```

pub mod config;
pub mod model;
pub mod normalize;
pub mod query;
pub mod source;
pub mod store;
pub mod sync;

pub use config::{QueryConfig, SheetNames, SqliteConfig, StoreBackend, SyncConfig};
pub use model::{
    CacheSnapshot, CollectionCounts, DetailRecord, FailureRecord, LocoEntry, LocoKey, MatchPolicy,
    ModificationRecord, ScheduleRecord,
};
pub use query::{LocoSummary, QueryError, QueryService};
pub use source::{CsvExportSource, SheetGrid, SheetSource, SourceError, StaticSource};
pub use store::{open_store, CacheStore, FailingStore, MemoryStore, StoreError};
pub use sync::{SyncEngine, SyncError, SyncOutcome, SyncReport, SyncState, SyncStatus};
