//! Operator-initiated deliveries: replay of a logged attempt and synthetic
//! test events.
//!
//! Both paths only create a job and nudge the worker. The HTTP call, the
//! signing and the audit record all happen in the worker, exactly as for
//! organic deliveries.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::delivery::WorkerTrigger;
use crate::error::{CourierError, CourierResult, ErrorCode};
use crate::store::{DeliveryLogStore, EndpointRegistry, InsertOutcome, JobStore};
use crate::types::{DeliveryJob, Endpoint, EventKind, JobOrigin, NewJob};

/// Creates replay and test jobs on behalf of a producer.
pub struct ReplayService {
    logs: Arc<dyn DeliveryLogStore>,
    jobs: Arc<dyn JobStore>,
    registry: Arc<dyn EndpointRegistry>,
    trigger: WorkerTrigger,
    max_attempts: u32,
}

impl ReplayService {
    pub fn new(
        logs: Arc<dyn DeliveryLogStore>,
        jobs: Arc<dyn JobStore>,
        registry: Arc<dyn EndpointRegistry>,
        trigger: WorkerTrigger,
        max_attempts: u32,
    ) -> Self {
        Self {
            logs,
            jobs,
            registry,
            trigger,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Re-deliver the payload recorded in a delivery log entry.
    ///
    /// The new job carries the logged payload byte-for-byte, links to the
    /// original event when there was one, and ignores the open-job dedup
    /// rule.
    pub fn replay_log_entry(&self, producer_id: &str, log_id: Uuid) -> CourierResult<DeliveryJob> {
        let entry = self.logs.get(log_id)?.ok_or_else(|| {
            CourierError::not_found(
                ErrorCode::NfDeliveryLog,
                format!("delivery log entry {} not found", log_id),
            )
        })?;
        let endpoint = self.owned_endpoint(producer_id, entry.endpoint_id)?;

        let event_id = self
            .jobs
            .get(entry.job_id)?
            .and_then(|job| job.transaction_event_id);

        let mut job = NewJob::new(
            endpoint.id,
            entry.event_type,
            entry.payload,
            JobOrigin::Replay,
            self.max_attempts,
        );
        if let Some(event_id) = event_id {
            job = job.with_event(event_id);
        }

        let job = self.create(job)?;
        info!(
            job_id = %job.id,
            log_id = %log_id,
            endpoint_id = %endpoint.id,
            producer_id,
            "Replay enqueued"
        );
        Ok(job)
    }

    /// Deliver a synthetic, clearly marked test event to one endpoint.
    pub fn send_test_event(
        &self,
        producer_id: &str,
        endpoint_id: Uuid,
        event_type: &str,
    ) -> CourierResult<DeliveryJob> {
        let kind =
            EventKind::from_str(event_type).map_err(|_| CourierError::unknown_event_type(event_type))?;
        let endpoint = self.owned_endpoint(producer_id, endpoint_id)?;

        let payload = test_payload(kind, Uuid::new_v4(), Utc::now());
        let job = self.create(NewJob::new(
            endpoint.id,
            kind.as_ref(),
            payload,
            JobOrigin::Test,
            self.max_attempts,
        ))?;

        info!(
            job_id = %job.id,
            endpoint_id = %endpoint.id,
            event_type,
            producer_id,
            "Test delivery enqueued"
        );
        Ok(job)
    }

    fn owned_endpoint(&self, producer_id: &str, endpoint_id: Uuid) -> CourierResult<Endpoint> {
        let endpoint = self.registry.get_endpoint(endpoint_id)?.ok_or_else(|| {
            CourierError::not_found(
                ErrorCode::NfEndpoint,
                format!("endpoint {} not found", endpoint_id),
            )
        })?;
        if endpoint.producer_id != producer_id {
            return Err(CourierError::forbidden(format!(
                "endpoint {} does not belong to producer {}",
                endpoint_id, producer_id
            )));
        }
        Ok(endpoint)
    }

    fn create(&self, job: NewJob) -> CourierResult<DeliveryJob> {
        match self.jobs.insert(job)? {
            InsertOutcome::Created(job) => {
                self.trigger.trigger();
                Ok(job)
            }
            InsertOutcome::Duplicate => Err(CourierError::internal(
                "replay job was treated as a duplicate",
            )),
        }
    }
}

/// Deterministic test payload for `kind`.
///
/// Same envelope as real deliveries plus `"test": true`. Field values are
/// fixed per event type so receivers can assert on them.
pub fn test_payload(kind: EventKind, event_id: Uuid, now: DateTime<Utc>) -> Value {
    let created_at = now.to_rfc3339();
    let mut data = json!({
        "order_id": "TEST-ORDER-0001",
        "order_status": kind.order_status(),
        "payment_method": kind.payment_method(),
        "Product": {
            "product_id": "test-product",
            "product_name": "Produto de Teste",
            "price": 97.0,
        },
        "Customer": {
            "full_name": "Cliente Teste",
            "email": "cliente.teste@example.com",
            "mobile": "+5511999999999",
            "document": "00000000000",
        },
        "Commissions": {
            "charge_amount": 97.0,
            "product_base_price": 97.0,
            "my_commission": 87.3,
            "currency": "BRL",
        },
        "Subscription": Value::Null,
    });

    match kind {
        EventKind::PixGenerated => {
            data["pix_code"] = json!("00020126580014BR.GOV.BCB.PIX0136TEST-PIX-CODE");
            data["pix_expiration"] = json!(created_at);
        }
        EventKind::BoletoGenerated => {
            data["boleto_barcode"] = json!("00000000000000000000000000000000000000000000000");
            data["boleto_url"] = json!("https://example.com/boleto/TEST-ORDER-0001");
        }
        EventKind::CartAbandoned => {
            data["checkout_link"] = json!("https://example.com/checkout/test-product");
        }
        EventKind::PurchaseRefunded | EventKind::PurchaseChargeback => {
            data["refunded_at"] = json!(created_at);
        }
        EventKind::PurchaseRefused => {
            data["refusal_reason"] = json!("card_declined");
        }
        _ => {}
    }

    if kind.is_subscription() {
        let status = match kind {
            EventKind::SubscriptionCanceled => "canceled",
            EventKind::SubscriptionLate => "overdue",
            _ => "active",
        };
        let mut subscription = json!({
            "id": "TEST-SUBSCRIPTION-0001",
            "status": status,
            "start_date": "2024-01-01T00:00:00Z",
            "next_payment": "2024-02-01T00:00:00Z",
            "plan": {"name": "Plano Mensal", "frequency": "monthly"},
        });
        if kind == EventKind::SubscriptionCanceled {
            subscription["canceled_at"] = json!(created_at);
        }
        data["Subscription"] = subscription;
    }

    json!({
        "event_id": event_id,
        "event_type": kind.as_ref(),
        "created_at": created_at,
        "test": true,
        "data": data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteDeliveryLogStore, SqliteEndpointRegistry, SqliteJobStore};
    use crate::types::{DeliveryLogEntry, DeliveryOutcome, JobStatus};
    use std::time::Duration;
    use strum::IntoEnumIterator;

    struct Fixture {
        logs: Arc<SqliteDeliveryLogStore>,
        jobs: Arc<SqliteJobStore>,
        registry: Arc<SqliteEndpointRegistry>,
        trigger: WorkerTrigger,
        service: ReplayService,
    }

    fn fixture() -> Fixture {
        let logs = Arc::new(SqliteDeliveryLogStore::in_memory().unwrap());
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let registry = Arc::new(SqliteEndpointRegistry::in_memory().unwrap());
        let trigger = WorkerTrigger::new();
        let service = ReplayService::new(
            logs.clone(),
            jobs.clone(),
            registry.clone(),
            trigger.clone(),
            1,
        );
        Fixture {
            logs,
            jobs,
            registry,
            trigger,
            service,
        }
    }

    fn logged_attempt(f: &Fixture, endpoint: &Endpoint) -> DeliveryLogEntry {
        let event_id = Uuid::new_v4();
        let job = NewJob::new(
            endpoint.id,
            "compra.aprovada",
            json!({"order_id": "o-9"}),
            JobOrigin::Organic,
            3,
        )
        .with_event(event_id);
        let job = match f.jobs.insert(job).unwrap() {
            InsertOutcome::Created(job) => job,
            InsertOutcome::Duplicate => panic!("unexpected duplicate"),
        };
        let entry = DeliveryLogEntry::new(
            endpoint.id,
            job.id,
            "compra.aprovada",
            json!({"order_id": "o-9"}),
            DeliveryOutcome::HttpError,
        )
        .with_status(500)
        .with_attempt(3);
        f.logs.append(&entry).unwrap();
        entry
    }

    #[tokio::test]
    async fn test_replay_creates_single_shot_job() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s");
        f.registry.upsert(&ep).unwrap();
        let entry = logged_attempt(&f, &ep);
        let original = f.jobs.get(entry.job_id).unwrap().unwrap();

        let job = f.service.replay_log_entry("prod-1", entry.id).unwrap();
        assert_eq!(job.origin, JobOrigin::Replay);
        assert_eq!(job.max_attempts, 1);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload, entry.payload);
        assert_eq!(job.transaction_event_id, original.transaction_event_id);

        // The original is still open; replay ignores the dedup rule.
        let again = f.service.replay_log_entry("prod-1", entry.id).unwrap();
        assert_ne!(again.id, job.id);

        tokio::time::timeout(Duration::from_secs(1), f.trigger.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_replay_unknown_entry() {
        let f = fixture();
        let err = f.service.replay_log_entry("prod-1", Uuid::new_v4()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NfDeliveryLog);
    }

    #[test]
    fn test_replay_other_producers_entry_is_forbidden() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s");
        f.registry.upsert(&ep).unwrap();
        let entry = logged_attempt(&f, &ep);

        let err = f.service.replay_log_entry("prod-2", entry.id).unwrap_err();
        assert_eq!(err.code(), ErrorCode::AuthNotOwner);
    }

    #[test]
    fn test_send_test_event() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s");
        f.registry.upsert(&ep).unwrap();

        let job = f
            .service
            .send_test_event("prod-1", ep.id, "assinatura.cancelada")
            .unwrap();
        assert_eq!(job.origin, JobOrigin::Test);
        assert!(job.transaction_event_id.is_none());
        assert_eq!(job.payload["test"], true);
        assert_eq!(job.payload["data"]["order_status"], "canceled");
        assert_eq!(f.logs.list_for_endpoint(ep.id, 10).unwrap().len(), 0);
    }

    #[test]
    fn test_send_test_event_validation() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s");
        f.registry.upsert(&ep).unwrap();

        let err = f
            .service
            .send_test_event("prod-1", ep.id, "compra.inexistente")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValUnknownEventType);

        let err = f
            .service
            .send_test_event("prod-1", Uuid::new_v4(), "compra.aprovada")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NfEndpoint);
    }

    #[test]
    fn test_payload_is_deterministic() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        for kind in EventKind::iter() {
            assert_eq!(test_payload(kind, id, now), test_payload(kind, id, now));
        }
    }

    #[test]
    fn test_payload_overrides() {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let canceled = test_payload(EventKind::SubscriptionCanceled, id, now);
        assert_eq!(canceled["event_type"], "assinatura.cancelada");
        assert_eq!(canceled["data"]["order_status"], "canceled");
        assert_eq!(canceled["data"]["Subscription"]["status"], "canceled");

        let approved = test_payload(EventKind::PurchaseApproved, id, now);
        assert_eq!(approved["data"]["order_status"], "paid");
        assert!(approved["data"]["Subscription"].is_null());
        assert!(approved["data"]["Customer"]["email"].is_string());

        let pix = test_payload(EventKind::PixGenerated, id, now);
        assert_eq!(pix["data"]["payment_method"], "pix");
        assert!(pix["data"]["pix_code"].is_string());
    }
}
