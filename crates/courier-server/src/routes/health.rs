//! Health check endpoint.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use courier_core::{JobStatus, JobStore};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub running: bool,
    pub version: String,
    /// Job counts per status. Empty once the runtime is detached.
    pub jobs: HashMap<JobStatus, usize>,
}

/// Health check endpoint.
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let jobs = match state.with_runtime(|rt| rt.stores().jobs.clone()).await {
        Some(jobs) => jobs.count_by_status()?,
        None => HashMap::new(),
    };
    let running = state.is_running().await;

    Ok(Json(HealthResponse {
        status: if running { "healthy" } else { "stopping" }.to_string(),
        running,
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs,
    }))
}
