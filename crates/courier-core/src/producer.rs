//! Turn events into delivery jobs, one per subscribed endpoint.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::CourierResult;
use crate::store::{EndpointRegistry, InsertOutcome, JobStore};
use crate::types::{Endpoint, Event, JobOrigin, NewJob};

/// What an enqueue did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueReport {
    /// Jobs created.
    pub created: usize,
    /// Endpoints that already had an open job for this event.
    pub duplicates: usize,
    /// Endpoints whose job could not be written.
    pub failed: usize,
}

/// Creates delivery jobs from events.
pub struct JobProducer {
    registry: Arc<dyn EndpointRegistry>,
    jobs: Arc<dyn JobStore>,
    max_attempts: u32,
}

impl JobProducer {
    pub fn new(
        registry: Arc<dyn EndpointRegistry>,
        jobs: Arc<dyn JobStore>,
        max_attempts: u32,
    ) -> Self {
        Self {
            registry,
            jobs,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Enqueue one organic job per active endpoint subscribed to the event.
    ///
    /// Safe to call more than once for the same event: endpoints that still
    /// have an open job for it are counted as duplicates. A failure writing
    /// one endpoint's job does not stop the others.
    pub fn enqueue(&self, event: &Event) -> CourierResult<EnqueueReport> {
        let endpoints = self
            .registry
            .list_active_endpoints(&event.event_type, event.product_id.clone())?;

        let mut report = EnqueueReport::default();
        for endpoint in &endpoints {
            match self.enqueue_for_endpoint(event, endpoint, JobOrigin::Organic) {
                Ok(InsertOutcome::Created(_)) => report.created += 1,
                Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Failed to enqueue delivery job"
                    );
                    report.failed += 1;
                }
            }
        }

        debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            endpoints = endpoints.len(),
            created = report.created,
            duplicates = report.duplicates,
            "Enqueued event"
        );
        Ok(report)
    }

    /// Create the job delivering `event` to `endpoint`.
    ///
    /// The payload is built here, once, and stored on the job.
    pub fn enqueue_for_endpoint(
        &self,
        event: &Event,
        endpoint: &Endpoint,
        origin: JobOrigin,
    ) -> CourierResult<InsertOutcome> {
        let job = NewJob::new(
            endpoint.id,
            event.event_type.clone(),
            event.to_payload(),
            origin,
            self.max_attempts,
        )
        .with_event(event.id);
        self.jobs.insert(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use crate::store::{MockEndpointRegistry, SqliteJobStore};
    use crate::types::JobStatus;
    use mockall::predicate::eq;
    use serde_json::json;

    fn producer_with(registry: MockEndpointRegistry) -> (JobProducer, Arc<SqliteJobStore>) {
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        (JobProducer::new(Arc::new(registry), jobs.clone(), 5), jobs)
    }

    #[test]
    fn test_enqueue_one_job_per_endpoint() {
        let a = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["compra.aprovada"]);
        let b = Endpoint::new("prod-1", "https://b.example/hook", "s").with_events(["compra.aprovada"]);
        let endpoints = vec![a.clone(), b.clone()];

        let mut registry = MockEndpointRegistry::new();
        registry
            .expect_list_active_endpoints()
            .with(eq("compra.aprovada"), eq(Some("course-1".to_string())))
            .returning(move |_, _| Ok(endpoints.clone()));

        let (producer, jobs) = producer_with(registry);
        let event = Event::new("compra.aprovada", json!({"order_id": "o-1"})).with_product("course-1");

        let report = producer.enqueue(&event).unwrap();
        assert_eq!(report.created, 2);

        let job = &jobs.list_for_endpoint(a.id, 10).unwrap()[0];
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.origin, JobOrigin::Organic);
        assert_eq!(job.transaction_event_id, Some(event.id));
        assert_eq!(job.payload, event.to_payload());
        assert_eq!(jobs.list_for_endpoint(b.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_enqueue_twice_is_idempotent() {
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["compra.aprovada"]);
        let mut registry = MockEndpointRegistry::new();
        registry
            .expect_list_active_endpoints()
            .times(2)
            .returning(move |_, _| Ok(vec![ep.clone()]));

        let (producer, jobs) = producer_with(registry);
        let event = Event::new("compra.aprovada", json!({}));

        assert_eq!(producer.enqueue(&event).unwrap().created, 1);
        let second = producer.enqueue(&event).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.duplicates, 1);

        let counts = jobs.count_by_status().unwrap();
        assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
    }

    #[test]
    fn test_no_subscribers_creates_nothing() {
        let mut registry = MockEndpointRegistry::new();
        registry
            .expect_list_active_endpoints()
            .returning(|_, _| Ok(vec![]));

        let (producer, _) = producer_with(registry);
        let report = producer.enqueue(&Event::new("pix.gerado", json!({}))).unwrap();
        assert_eq!(report, EnqueueReport::default());
    }

    #[test]
    fn test_registry_error_propagates() {
        let mut registry = MockEndpointRegistry::new();
        registry
            .expect_list_active_endpoints()
            .returning(|_, _| Err(CourierError::database("registry offline")));

        let (producer, _) = producer_with(registry);
        assert!(producer.enqueue(&Event::new("pix.gerado", json!({}))).is_err());
    }
}
