//! Replay and test deliveries.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use courier_core::DeliveryJob;

use super::producer_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Re-deliver the payload recorded in a delivery log entry.
/// POST /deliveries/:id/replay
pub async fn replay_delivery(
    State(state): State<AppState>,
    Path(log_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<DeliveryJob>)> {
    let producer_id = producer_id(&headers)?;
    let replay = state
        .with_runtime(|rt| rt.replay())
        .await
        .ok_or_else(ApiError::shutting_down)?;

    let job = replay.replay_log_entry(&producer_id, log_id)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct TestEventRequest {
    pub event_type: String,
}

/// Send a synthetic test event to one endpoint.
/// POST /endpoints/:id/test
pub async fn send_test_event(
    State(state): State<AppState>,
    Path(endpoint_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<TestEventRequest>,
) -> ApiResult<(StatusCode, Json<DeliveryJob>)> {
    let producer_id = producer_id(&headers)?;
    let replay = state
        .with_runtime(|rt| rt.replay())
        .await
        .ok_or_else(ApiError::shutting_down)?;

    let job = replay.send_test_event(&producer_id, endpoint_id, &request.event_type)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
