//! On-demand worker passes and backfill runs.

use std::time::Duration;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;

use courier_core::{PassReport, ReconcileReport};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct BackfillRequest {
    /// Overrides the configured lookback window.
    pub lookback_minutes: Option<u64>,
}

/// Run the reconciler over a trailing window.
/// POST /backfill
pub async fn run_backfill(
    State(state): State<AppState>,
    request: Option<Json<BackfillRequest>>,
) -> ApiResult<Json<ReconcileReport>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let (reconciler, default_lookback) = state
        .with_runtime(|rt| (rt.reconciler(), rt.config().reconciler.lookback_minutes))
        .await
        .ok_or_else(ApiError::shutting_down)?;

    let minutes = request.lookback_minutes.unwrap_or(default_lookback);
    if minutes == 0 {
        return Err(ApiError::validation("lookback_minutes must be positive"));
    }

    let report = tokio::task::spawn_blocking(move || {
        reconciler.run_window(Duration::from_secs(minutes * 60))
    })
    .await
    .map_err(|e| ApiError::internal(format!("Backfill task failed: {}", e)))??;

    info!(
        lookback_minutes = minutes,
        created = report.created,
        failures = report.failures.len(),
        "Backfill requested via API"
    );
    Ok(Json(report))
}

/// Run one delivery pass now.
/// POST /worker/run
pub async fn run_worker(State(state): State<AppState>) -> ApiResult<Json<PassReport>> {
    let worker = state
        .with_runtime(|rt| rt.worker())
        .await
        .ok_or_else(ApiError::shutting_down)?;

    Ok(Json(worker.run_pass().await?))
}
