//! In-memory sheet source
//!
//! Serves grids held in memory. Useful for tests and for seeding a cache
//! from local data; it can also be switched into an unavailable state to
//! exercise failure handling.

use crate::source::{SheetGrid, SheetSource, SourceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct StaticSource {
    sheets: Arc<RwLock<HashMap<String, SheetGrid>>>,
    unavailable: Arc<AtomicBool>,
    fetches: Arc<AtomicUsize>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the grid served for `sheet_name`
    pub async fn set_sheet(&self, sheet_name: &str, grid: SheetGrid) {
        self.sheets.write().await.insert(sheet_name.to_string(), grid);
    }

    /// Build a grid from string slices
    pub fn grid(rows: &[&[&str]]) -> SheetGrid {
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect()
    }

    /// Make every fetch fail until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of fetch attempts so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SheetSource for StaticSource {
    async fn fetch_sheet(&self, _sheet_id: &str, sheet_name: &str) -> Result<SheetGrid, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::unavailable(sheet_name, "source switched off"));
        }

        self.sheets
            .read()
            .await
            .get(sheet_name)
            .cloned()
            .ok_or_else(|| SourceError::unavailable(sheet_name, "no such sheet"))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
