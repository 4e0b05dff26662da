//! Delivery jobs: "deliver this payload to this endpoint".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a delivery job.
///
/// `pending -> delivering -> {succeeded | pending (retry) | exhausted | failed}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `next_attempt_at`.
    Pending,
    /// Claimed by a worker pass.
    Delivering,
    /// Endpoint answered 2xx.
    Succeeded,
    /// Non-retryable configuration problem found before sending.
    Failed,
    /// All attempts used without success.
    Exhausted,
}

impl JobStatus {
    /// Terminal states are never revisited by the worker.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Exhausted)
    }
}

/// How a job came to exist.
///
/// Replay and test jobs are deliberate re-deliveries and bypass the
/// one-open-job-per-(endpoint, event) rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobOrigin {
    /// Enqueued when the event arrived.
    Organic,
    /// Created by the reconciler for a missed event.
    Backfill,
    /// Operator re-delivery of a logged attempt.
    Replay,
    /// Synthetic test delivery.
    Test,
}

impl JobOrigin {
    /// Whether jobs of this origin take part in pair deduplication.
    pub fn is_deduplicated(&self) -> bool {
        matches!(self, Self::Organic | Self::Backfill)
    }
}

/// A durable unit of delivery work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub id: Uuid,
    pub webhook_endpoint_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_event_id: Option<Uuid>,
    pub event_type: String,
    /// Exact document delivered; never regenerated by the worker.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub origin: JobOrigin,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Token of the pass holding the job. Set only while `delivering`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryJob {
    /// Attempts left before the job is exhausted.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub webhook_endpoint_id: Uuid,
    pub transaction_event_id: Option<Uuid>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub origin: JobOrigin,
    pub max_attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
}

impl NewJob {
    /// Create a job due now. `max_attempts` is clamped to at least 1.
    pub fn new(
        webhook_endpoint_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        origin: JobOrigin,
        max_attempts: u32,
    ) -> Self {
        Self {
            webhook_endpoint_id,
            transaction_event_id: None,
            event_type: event_type.into(),
            payload,
            origin,
            max_attempts: max_attempts.max(1),
            next_attempt_at: Utc::now(),
        }
    }

    /// Builder: link to the originating event.
    pub fn with_event(mut self, event_id: Uuid) -> Self {
        self.transaction_event_id = Some(event_id);
        self
    }

    /// Builder: override when the first attempt is due.
    pub fn due_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = at;
        self
    }

    /// Materialize the job record in `pending` with zero attempts.
    pub fn into_job(self, now: DateTime<Utc>) -> DeliveryJob {
        DeliveryJob {
            id: Uuid::new_v4(),
            webhook_endpoint_id: self.webhook_endpoint_id,
            transaction_event_id: self.transaction_event_id,
            event_type: self.event_type,
            payload: self.payload,
            status: JobStatus::Pending,
            origin: self.origin,
            attempts: 0,
            max_attempts: self.max_attempts,
            next_attempt_at: self.next_attempt_at,
            last_error: None,
            claim_id: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
