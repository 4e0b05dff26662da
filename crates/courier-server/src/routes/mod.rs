//! Route definitions for the management API.

mod events;
mod health;
mod jobs;
mod operations;
mod replay;

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Header naming the producer that owns the target endpoint.
pub const PRODUCER_HEADER: &str = "x-producer-id";

/// The calling producer, required by every endpoint-scoped route.
fn producer_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(PRODUCER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Missing X-Producer-Id header"))
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Ingestion
        .route("/events", post(events::ingest_event))
        // Lookups
        .route("/jobs/:id", get(jobs::get_job))
        .route("/endpoints/:id/deliveries", get(jobs::list_deliveries))
        // Replay and test deliveries
        .route("/deliveries/:id/replay", post(replay::replay_delivery))
        .route("/endpoints/:id/test", post(replay::send_test_event))
        // Operations
        .route("/backfill", post(operations::run_backfill))
        .route("/worker/run", post(operations::run_worker))
        // Attach state
        .with_state(state)
}

pub use events::*;
pub use health::*;
pub use jobs::*;
pub use operations::*;
pub use replay::*;
