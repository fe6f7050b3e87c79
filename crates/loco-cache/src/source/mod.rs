//! Source adapters: where raw sheet grids come from

use async_trait::async_trait;
use thiserror::Error;

pub mod csv_export;
pub mod fixture;

pub use csv_export::CsvExportSource;
pub use fixture::StaticSource;

/// Rows of a sheet as untyped text cells; the first non-blank row is the header.
pub type SheetGrid = Vec<Vec<String>>;

/// Fetch failure. Malformed content is not reported here; that is the
/// normalizer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("source unavailable while fetching sheet '{sheet}': {reason}")]
    Unavailable { sheet: String, reason: String },
}

impl SourceError {
    pub fn unavailable(sheet: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            sheet: sheet.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Trait for spreadsheet sources
#[async_trait]
pub trait SheetSource: Send + Sync {
    /// Fetch every row of `sheet_name` in spreadsheet `sheet_id`
    async fn fetch_sheet(&self, sheet_id: &str, sheet_name: &str) -> Result<SheetGrid, SourceError>;

    /// Get source name
    fn name(&self) -> &'static str;
}
