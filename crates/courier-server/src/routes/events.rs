//! Event ingestion.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::{EnqueueReport, Event};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for ingesting an event.
#[derive(Debug, Deserialize)]
pub struct IngestEventRequest {
    /// Caller-assigned id. Re-sending the same id is safe.
    pub id: Option<Uuid>,
    pub event_type: String,
    pub sale_id: Option<String>,
    pub product_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
}

impl IngestEventRequest {
    fn into_event(self) -> Event {
        let mut event = Event::new(self.event_type, self.metadata);
        if let Some(id) = self.id {
            event.id = id;
        }
        if let Some(created_at) = self.created_at {
            event = event.with_created_at(created_at);
        }
        event.sale_id = self.sale_id;
        event.product_id = self.product_id;
        event
    }
}

#[derive(Debug, Serialize)]
pub struct IngestEventResponse {
    pub event_id: Uuid,
    #[serde(flatten)]
    pub report: EnqueueReport,
}

/// Record an event and enqueue a delivery for every subscribed endpoint.
/// POST /events
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(request): Json<IngestEventRequest>,
) -> ApiResult<(StatusCode, Json<IngestEventResponse>)> {
    if request.event_type.trim().is_empty() {
        return Err(ApiError::validation("event_type must not be empty"));
    }

    let event = request.into_event();
    let report = state
        .with_runtime(|rt| rt.ingest(&event))
        .await
        .ok_or_else(ApiError::shutting_down)??;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestEventResponse {
            event_id: event.id,
            report,
        }),
    ))
}
