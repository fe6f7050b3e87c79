//! Cache configuration types

use crate::model::MatchPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync engine configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Spreadsheet holding every sheet
    pub sheet_id: String,

    /// Sheet names per record kind
    pub sheets: SheetNames,

    /// Refresh period of the background scheduler
    pub interval: Duration,

    /// Columns left out of detail and modification field/value pairs
    pub excluded_columns: Vec<String>,
}

impl SyncConfig {
    pub fn new(sheet_id: impl Into<String>) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            sheets: SheetNames::default(),
            interval: Duration::from_secs(default_interval_secs()),
            excluded_columns: default_excluded_columns(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Names of the sheets inside the spreadsheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetNames {
    #[serde(default = "default_details_sheet")]
    pub details: String,

    #[serde(default = "default_schedules_sheet")]
    pub schedules: String,

    #[serde(default = "default_failures_sheet")]
    pub failures: String,

    /// Not fetched when unset
    #[serde(default = "default_modifications_sheet")]
    pub modifications: Option<String>,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            details: default_details_sheet(),
            schedules: default_schedules_sheet(),
            failures: default_failures_sheet(),
            modifications: default_modifications_sheet(),
        }
    }
}

/// Query service configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Autocomplete matching: "contains" or "prefix"
    #[serde(default)]
    pub match_policy: MatchPolicy,

    /// Upper bound on suggestions returned for one request
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,

    /// Shorter partial keys get no suggestions
    #[serde(default = "default_min_partial_len")]
    pub min_partial_len: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            match_policy: MatchPolicy::default(),
            max_suggestions: default_max_suggestions(),
            min_partial_len: default_min_partial_len(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process generation swap (fast, non-persistent)
    #[default]
    Memory,

    /// SQLite database (persistent across restarts)
    Sqlite(SqliteConfig),
}

/// SQLite storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file URL, e.g. `sqlite://loco-cache.db`; in-memory URLs are refused
    #[serde(default = "default_sqlite_url")]
    pub url: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: default_sqlite_url(),
        }
    }
}

pub fn default_interval_secs() -> u64 {
    600
}

pub fn default_excluded_columns() -> Vec<String> {
    vec!["Type".to_string()]
}

fn default_details_sheet() -> String {
    "Loco_list".to_string()
}

fn default_schedules_sheet() -> String {
    "Loco_Schedules".to_string()
}

fn default_failures_sheet() -> String {
    "Traction_failures".to_string()
}

fn default_modifications_sheet() -> Option<String> {
    Some("WAG7_Modifications".to_string())
}

fn default_max_suggestions() -> usize {
    20
}

fn default_min_partial_len() -> usize {
    3
}

fn default_sqlite_url() -> String {
    "sqlite://loco-cache.db".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_defaults() {
        let config = SyncConfig::new("sheet");
        assert_eq!(config.interval, Duration::from_secs(600));
        assert_eq!(config.sheets.details, "Loco_list");
        assert_eq!(config.sheets.modifications.as_deref(), Some("WAG7_Modifications"));
        assert_eq!(config.excluded_columns, vec!["Type"]);
    }

    #[test]
    fn test_store_backend_tagged_form() {
        let backend: StoreBackend = serde_json::from_str(r#"{"type":"sqlite","url":"sqlite://cache.db"}"#).unwrap();
        assert_eq!(
            backend,
            StoreBackend::Sqlite(SqliteConfig {
                url: "sqlite://cache.db".to_string()
            })
        );

        let memory: StoreBackend = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert_eq!(memory, StoreBackend::Memory);
    }

    #[test]
    fn test_query_config_partial() {
        let config: QueryConfig = serde_json::from_str(r#"{"match_policy":"prefix"}"#).unwrap();
        assert_eq!(config.match_policy, MatchPolicy::Prefix);
        assert_eq!(config.max_suggestions, 20);
        assert_eq!(config.min_partial_len, 3);
    }
}
