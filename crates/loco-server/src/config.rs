// File: src/config.rs
// Purpose: Configuration parsing from loco.toml plus LOCO_* environment overrides

use anyhow::{bail, Context, Result};
use loco_cache::config::{default_excluded_columns, default_interval_secs};
use loco_cache::source::csv_export::DEFAULT_BASE_URL;
use loco_cache::{QueryConfig, SheetNames, SqliteConfig, StoreBackend, SyncConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub store: StoreBackend,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Allowed CORS origins; `"*"` allows any
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

/// Spreadsheet source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Required; the server refuses to start without it
    #[serde(default)]
    pub sheet_id: String,

    #[serde(flatten)]
    pub sheets: SheetNames,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_excluded_columns")]
    pub excluded_columns: Vec<String>,
}

fn default_port() -> u16 {
    8001
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            sheet_id: String::new(),
            sheets: SheetNames::default(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            excluded_columns: default_excluded_columns(),
        }
    }
}

impl Config {
    /// Load configuration from loco.toml
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Missing or empty file means defaults
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Load configuration from default path (./loco.toml)
    pub fn load_default() -> Result<Self> {
        Self::load("loco.toml")
    }

    /// Apply `LOCO_*` overrides, looking each variable up through `var`
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(sheet_id) = var("LOCO_SHEET_ID") {
            self.source.sheet_id = sheet_id.trim().to_string();
        }

        if let Some(port) = var("LOCO_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("LOCO_PORT is not a port number: {port}"))?;
        }

        if let Some(secs) = var("LOCO_REFRESH_SECS") {
            self.sync.interval_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("LOCO_REFRESH_SECS is not a number of seconds: {secs}"))?;
        }

        if let Some(url) = var("LOCO_DATABASE_URL") {
            self.store = StoreBackend::Sqlite(SqliteConfig { url });
        }

        if let Some(origins) = var("LOCO_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(())
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.source.sheet_id.trim().is_empty() {
            bail!("source.sheet_id is not set (configure it in loco.toml or LOCO_SHEET_ID)");
        }
        if self.sync.interval_secs == 0 {
            bail!("sync.interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn to_sync_config(&self) -> SyncConfig {
        let mut sheets = self.source.sheets.clone();
        if sheets.modifications.as_deref().is_some_and(|name| name.trim().is_empty()) {
            sheets.modifications = None;
        }

        SyncConfig {
            sheet_id: self.source.sheet_id.clone(),
            sheets,
            interval: Duration::from_secs(self.sync.interval_secs),
            excluded_columns: self.sync.excluded_columns.clone(),
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
