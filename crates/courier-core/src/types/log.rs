//! Delivery log entries: one per delivery attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// What happened on a single attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeliveryOutcome {
    /// 2xx response.
    Success,
    /// Non-2xx response.
    HttpError,
    /// Timeout, refused or reset connection.
    TransportError,
    /// Rejected before sending.
    ConfigError,
}

/// Append-only audit record of one delivery attempt.
///
/// The payload snapshot is what replay re-sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub endpoint_id: Uuid,
    pub job_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    pub outcome: DeliveryOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Attempt number this entry records (1-based; 0 for pre-flight rejections).
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl DeliveryLogEntry {
    /// Start an entry for `job_id` with the given outcome.
    pub fn new(
        endpoint_id: Uuid,
        job_id: Uuid,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        outcome: DeliveryOutcome,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint_id,
            job_id,
            event_type: event_type.into(),
            payload,
            response_status: None,
            outcome,
            error: None,
            response_body: None,
            duration_ms: None,
            attempt: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.response_status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_response_body(mut self, body: impl Into<String>) -> Self {
        self.response_body = Some(body.into());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == DeliveryOutcome::Success
    }
}
