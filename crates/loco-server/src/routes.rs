// File: src/routes.rs
// Purpose: /api routes over the query service and sync engine

use crate::error::ApiError;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use loco_cache::sync::SyncFailure;
use loco_cache::{
    CollectionCounts, LocoKey, LocoSummary, QueryService, SyncEngine, SyncOutcome, SyncState,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub engine: Arc<SyncEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(root))
        .route("/api/", get(root))
        .route("/api/search/:partial", get(search))
        .route("/api/loco/:loco_no", get(loco_summary))
        .route("/api/status", get(status))
        .route("/api/refresh", post(refresh))
        .with_state(state)
}

#[derive(Serialize)]
struct Banner {
    message: &'static str,
    version: &'static str,
}

async fn root() -> Json<Banner> {
    Json(Banner {
        message: "Loco Data Summary API",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct Suggestions {
    suggestions: Vec<LocoKey>,
}

async fn search(
    State(state): State<AppState>,
    Path(partial): Path<String>,
) -> Result<Json<Suggestions>, ApiError> {
    let config = state.query.config();
    if partial.trim().chars().count() < config.min_partial_len {
        return Ok(Json(Suggestions {
            suggestions: Vec::new(),
        }));
    }

    let suggestions = state.query.suggest(&partial, config.max_suggestions).await?;
    Ok(Json(Suggestions { suggestions }))
}

async fn loco_summary(
    State(state): State<AppState>,
    Path(loco_no): Path<String>,
) -> Result<Json<LocoSummary>, ApiError> {
    match state.query.lookup(&loco_no).await? {
        Some(summary) => Ok(Json(summary)),
        None => Err(ApiError::not_found(format!(
            "No data found for loco number: {}",
            loco_no.trim()
        ))),
    }
}

/// Record counts keyed by collection name
#[derive(Debug, Serialize)]
struct RecordsCount {
    loco_data: usize,
    schedule_data: usize,
    failure_data: usize,
    modifications_data: usize,
}

impl From<CollectionCounts> for RecordsCount {
    fn from(counts: CollectionCounts) -> Self {
        Self {
            loco_data: counts.details,
            schedule_data: counts.schedules,
            failure_data: counts.failures,
            modifications_data: counts.modifications,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    /// "active" once a generation is served, "pending" before
    status: &'static str,
    state: SyncState,
    last_refresh: Option<DateTime<Utc>>,
    next_refresh: Option<DateTime<Utc>>,
    last_failure: Option<SyncFailure>,
    records_count: RecordsCount,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let status = state.engine.status().await?;

    Ok(Json(StatusResponse {
        status: if status.last_updated.is_some() { "active" } else { "pending" },
        state: status.state,
        last_refresh: status.last_updated,
        next_refresh: status.next_scheduled,
        last_failure: status.last_failure,
        records_count: status.counts.into(),
    }))
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum RefreshResponse {
    Success {
        message: &'static str,
        counts: RecordsCount,
        refreshed_at: DateTime<Utc>,
    },
    InProgress {
        message: &'static str,
    },
}

async fn refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, ApiError> {
    info!("manual refresh requested");

    let response = match state.engine.trigger_sync().await? {
        SyncOutcome::Committed(report) => RefreshResponse::Success {
            message: "Data refreshed successfully",
            counts: report.counts.into(),
            refreshed_at: report.committed_at,
        },
        SyncOutcome::AlreadyRunning => RefreshResponse::InProgress {
            message: "A refresh is already running",
        },
    };

    Ok(Json(response))
}
