//! Sync engine: source → normalizer → atomic generation swap
//!
//! A cycle fetches every configured sheet, normalizes the grids into a
//! candidate [`CacheSnapshot`] built entirely off to the side, and hands it to
//! the store as one generation. At most one cycle runs at a time; triggers that
//! arrive while a cycle is in flight collapse into [`SyncOutcome::AlreadyRunning`].
//! A failed cycle leaves the previously committed generation untouched.

use crate::config::SyncConfig;
use crate::model::{
    CacheSnapshot, CollectionCounts, DetailRecord, FailureRecord, ModificationRecord, ScheduleRecord,
    SnapshotBuilder,
};
use crate::normalize::{
    normalize_attributes, normalize_details, normalize_failures, normalize_schedules, Normalized,
    SheetError,
};
use crate::source::{SheetGrid, SheetSource, SourceError};
use crate::store::{CacheStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Why a cycle failed
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("malformed sheet: {0}")]
    Sheet(#[from] SheetError),

    #[error("failed to commit generation: {0}")]
    Store(#[from] StoreError),
}

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Syncing => write!(f, "syncing"),
        }
    }
}

/// Rows skipped per sheet during one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SkippedRows {
    pub details: usize,
    pub schedules: usize,
    pub failures: usize,
    pub modifications: usize,
}

impl SkippedRows {
    pub fn total(&self) -> usize {
        self.details + self.schedules + self.failures + self.modifications
    }
}

/// Result of a committed cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub committed_at: DateTime<Utc>,
    pub counts: CollectionCounts,
    pub skipped: SkippedRows,
    #[serde(skip)]
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A new generation is live
    Committed(SyncReport),
    /// Another cycle was already running; nothing was fetched
    AlreadyRunning,
}

/// Last failed cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub at: DateTime<Utc>,
    pub reason: String,
}

/// Snapshot of engine health for status endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Commit time of the generation currently served
    pub last_updated: Option<DateTime<Utc>>,
    /// Last cycle committed by this process
    pub last_success: Option<DateTime<Utc>>,
    pub next_scheduled: Option<DateTime<Utc>>,
    pub last_failure: Option<SyncFailure>,
    pub counts: CollectionCounts,
}

#[derive(Debug, Default)]
struct SyncHistory {
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<SyncFailure>,
    next_scheduled: Option<DateTime<Utc>>,
}

/// Holds the single-flight flag for the duration of a cycle
struct CycleGuard<'a> {
    syncing: &'a AtomicBool,
    state: &'a watch::Sender<SyncState>,
}

impl<'a> CycleGuard<'a> {
    fn acquire(syncing: &'a AtomicBool, state: &'a watch::Sender<SyncState>) -> Option<Self> {
        syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        state.send_replace(SyncState::Syncing);
        Some(Self { syncing, state })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(SyncState::Idle);
        self.syncing.store(false, Ordering::Release);
    }
}

/// Main sync engine
pub struct SyncEngine {
    config: SyncConfig,
    source: Arc<dyn SheetSource>,
    store: Arc<dyn CacheStore>,
    syncing: AtomicBool,
    state: watch::Sender<SyncState>,
    history: RwLock<SyncHistory>,
}

impl SyncEngine {
    /// Create a new sync engine
    pub fn new(config: SyncConfig, source: Arc<dyn SheetSource>, store: Arc<dyn CacheStore>) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            config,
            source,
            store,
            syncing: AtomicBool::new(false),
            state,
            history: RwLock::new(SyncHistory::default()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Run one cycle unless one is already in flight.
    ///
    /// Failures are logged and recorded for [`status`](Self::status) before
    /// being returned; the served generation is unchanged in that case.
    pub async fn trigger_sync(&self) -> Result<SyncOutcome, SyncError> {
        let Some(_guard) = CycleGuard::acquire(&self.syncing, &self.state) else {
            debug!("sync already in progress, trigger collapsed");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        info!(sheet_id = %self.config.sheet_id, source = self.source.name(), "starting cache sync");
        let started = Instant::now();

        match self.run_cycle(started).await {
            Ok(report) => {
                self.history.write().await.last_success = Some(report.committed_at);
                info!(
                    details = report.counts.details,
                    schedules = report.counts.schedules,
                    failures = report.counts.failures,
                    modifications = report.counts.modifications,
                    skipped = report.skipped.total(),
                    elapsed_ms = report.duration.as_millis() as u64,
                    "cache sync committed"
                );
                Ok(SyncOutcome::Committed(report))
            }
            Err(err) => {
                error!(error = %err, "cache sync failed, keeping previous generation");
                self.history.write().await.last_failure = Some(SyncFailure {
                    at: Utc::now(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_cycle(&self, started: Instant) -> Result<SyncReport, SyncError> {
        let sheets = &self.config.sheets;
        let modifications_sheet = sheets.modifications.as_deref().filter(|name| !name.is_empty());

        let (details_grid, schedules_grid, failures_grid, modifications_grid) = tokio::try_join!(
            self.fetch(&sheets.details),
            self.fetch(&sheets.schedules),
            self.fetch(&sheets.failures),
            async {
                match modifications_sheet {
                    Some(name) => self.fetch(name).await.map(Some),
                    None => Ok(None),
                }
            },
        )?;

        let details = normalize_details(&sheets.details, &details_grid, &self.config.excluded_columns)?;
        let schedules = normalize_schedules(&sheets.schedules, &schedules_grid)?;
        let failures = normalize_failures(&sheets.failures, &failures_grid)?;
        let modifications = match (modifications_sheet, modifications_grid) {
            (Some(name), Some(grid)) => {
                Some(normalize_attributes(name, &grid, &self.config.excluded_columns)?)
            }
            _ => None,
        };

        let mut skipped = SkippedRows {
            details: report_sheet(&sheets.details, &details),
            schedules: report_sheet(&sheets.schedules, &schedules),
            failures: report_sheet(&sheets.failures, &failures),
            modifications: 0,
        };
        if let (Some(name), Some(modifications)) = (modifications_sheet, &modifications) {
            skipped.modifications = report_sheet(name, modifications);
        }

        let committed_at = Utc::now();
        let snapshot = assemble(details, schedules, failures, modifications, committed_at);
        let counts = snapshot.counts();

        self.store.replace_generation(snapshot).await?;

        Ok(SyncReport {
            committed_at,
            counts,
            skipped,
            duration: started.elapsed(),
        })
    }

    async fn fetch(&self, sheet_name: &str) -> Result<SheetGrid, SourceError> {
        self.source.fetch_sheet(&self.config.sheet_id, sheet_name).await
    }

    /// Current health, including the served generation's freshness
    pub async fn status(&self) -> Result<SyncStatus, StoreError> {
        let info = self.store.generation_info().await?;
        let history = self.history.read().await;

        Ok(SyncStatus {
            state: self.state(),
            last_updated: info.last_updated,
            last_success: history.last_success,
            next_scheduled: history.next_scheduled,
            last_failure: history.last_failure.clone(),
            counts: info.counts,
        })
    }

    /// Spawn the refresh loop.
    ///
    /// The first tick fires immediately, so the cache is populated eagerly at
    /// startup; later ticks follow `config.interval`. Ticks missed while a
    /// cycle ran are skipped, not queued. The loop ends once `shutdown` turns
    /// `true` or its sender is dropped.
    pub fn spawn_scheduler(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = engine.config.interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "sync scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.history.write().await.next_scheduled =
                            chrono::Duration::from_std(period).ok().map(|p| Utc::now() + p);

                        // Failures are already logged and recorded by the engine.
                        if let Ok(SyncOutcome::AlreadyRunning) = engine.trigger_sync().await {
                            debug!("scheduled sync skipped, a cycle is already running");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("sync scheduler stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Log skipped rows and missing optional columns of one sheet, returning the skip count
fn report_sheet<T>(sheet: &str, normalized: &Normalized<T>) -> usize {
    if !normalized.missing_columns.is_empty() {
        warn!(sheet, columns = ?normalized.missing_columns, "optional columns missing, fields left empty");
    }
    if !normalized.issues.is_empty() {
        warn!(sheet, skipped = normalized.issues.len(), "skipped malformed rows");
        for issue in &normalized.issues {
            debug!(sheet, row = issue.row, reason = %issue.reason, "row skipped");
        }
    }
    normalized.issues.len()
}

fn assemble(
    details: Normalized<Vec<DetailRecord>>,
    schedules: Normalized<ScheduleRecord>,
    failures: Normalized<FailureRecord>,
    modifications: Option<Normalized<Vec<ModificationRecord>>>,
    committed_at: DateTime<Utc>,
) -> CacheSnapshot {
    let mut builder = SnapshotBuilder::new();

    for row in details.rows {
        builder.add_details(row.key, row.record);
    }
    for row in schedules.rows {
        builder.add_schedule(row.key, row.record);
    }
    for row in failures.rows {
        builder.add_failure(row.key, row.record);
    }
    for row in modifications.into_iter().flat_map(|m| m.rows) {
        builder.add_modifications(row.key, row.record);
    }

    builder.finish(committed_at)
}
