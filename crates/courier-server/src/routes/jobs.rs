//! Job and delivery log lookups.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_core::{
    CourierError, DeliveryJob, DeliveryLogEntry, DeliveryLogStore, EndpointRegistry,
    EndpointSummary, JobStore,
};

use super::producer_id;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

/// Fetch one delivery job.
/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeliveryJob>> {
    let jobs = state
        .with_runtime(|rt| rt.stores().jobs.clone())
        .await
        .ok_or_else(ApiError::shutting_down)?;

    jobs.get(id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", id)))
}

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeliveriesResponse {
    pub endpoint: EndpointSummary,
    pub deliveries: Vec<DeliveryLogEntry>,
}

/// Most recent delivery attempts for an endpoint, newest first. Only the
/// producer owning the endpoint may read its payloads.
/// GET /endpoints/:id/deliveries
pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveriesQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<DeliveriesResponse>> {
    let producer_id = producer_id(&headers)?;
    let stores = state
        .with_runtime(|rt| rt.stores().clone())
        .await
        .ok_or_else(ApiError::shutting_down)?;

    let endpoint = stores
        .registry
        .get_endpoint(id)?
        .ok_or_else(|| ApiError::not_found(format!("Endpoint {} not found", id)))?;
    if endpoint.producer_id != producer_id {
        return Err(CourierError::forbidden(format!(
            "endpoint {} does not belong to producer {}",
            id, producer_id
        ))
        .into());
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let deliveries = stores.logs.list_for_endpoint(id, limit)?;

    Ok(Json(DeliveriesResponse {
        endpoint: endpoint.summary(),
        deliveries,
    }))
}
