//! Backfill: find events that should have produced a job but did not.
//!
//! The producer can miss an event (crash between the event write and the
//! enqueue, registry briefly unavailable). The reconciler scans a recent
//! window of the event log and creates `backfill` jobs for every
//! (endpoint, event) pair with no organic or backfill job on record.

mod scheduler;

pub use scheduler::{ReconcileScheduler, ReconcileSchedulerConfig};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CourierError, CourierResult};
use crate::producer::JobProducer;
use crate::store::{EndpointRegistry, EventLog, InsertOutcome, JobStore};
use crate::types::{Event, JobOrigin};

/// A pair the reconciler could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub event_id: Uuid,
    /// `None` when the endpoint lookup itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<Uuid>,
    pub error: String,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub events_scanned: usize,
    /// Backfill jobs created.
    pub created: usize,
    /// Pairs that already had a job.
    pub already_present: usize,
    pub failures: Vec<ReconcileFailure>,
}

/// Scans the event log for missed deliveries.
pub struct Reconciler {
    events: Arc<dyn EventLog>,
    registry: Arc<dyn EndpointRegistry>,
    jobs: Arc<dyn JobStore>,
    producer: Arc<JobProducer>,
}

impl Reconciler {
    pub fn new(
        events: Arc<dyn EventLog>,
        registry: Arc<dyn EndpointRegistry>,
        jobs: Arc<dyn JobStore>,
        producer: Arc<JobProducer>,
    ) -> Self {
        Self {
            events,
            registry,
            jobs,
            producer,
        }
    }

    /// Reconcile events from the last `lookback`.
    pub fn run_window(&self, lookback: Duration) -> CourierResult<ReconcileReport> {
        let lookback = chrono::Duration::from_std(lookback)
            .map_err(|e| CourierError::validation(format!("lookback out of range: {}", e)))?;
        self.run(Utc::now() - lookback)
    }

    /// Reconcile every event created at or after `since`.
    ///
    /// Only a failure to read the event log aborts the run. Per-event and
    /// per-endpoint errors are recorded in the report.
    pub fn run(&self, since: DateTime<Utc>) -> CourierResult<ReconcileReport> {
        let events = self.events.read_events(since, None)?;
        let mut report = ReconcileReport {
            events_scanned: events.len(),
            ..Default::default()
        };

        for event in &events {
            self.reconcile_event(event, &mut report);
        }

        if report.created > 0 || !report.failures.is_empty() {
            info!(
                since = %since,
                events_scanned = report.events_scanned,
                created = report.created,
                already_present = report.already_present,
                failures = report.failures.len(),
                "Backfill run complete"
            );
        } else {
            debug!(
                since = %since,
                events_scanned = report.events_scanned,
                "Backfill found nothing missing"
            );
        }
        Ok(report)
    }

    fn reconcile_event(&self, event: &Event, report: &mut ReconcileReport) {
        let endpoints = match self
            .registry
            .list_active_endpoints(&event.event_type, event.product_id.clone())
        {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Backfill endpoint lookup failed");
                report.failures.push(ReconcileFailure {
                    event_id: event.id,
                    endpoint_id: None,
                    error: e.to_string(),
                });
                return;
            }
        };

        for endpoint in &endpoints {
            let outcome = self
                .jobs
                .has_job_for(endpoint.id, event.id)
                .and_then(|exists| {
                    if exists {
                        return Ok(None);
                    }
                    self.producer
                        .enqueue_for_endpoint(event, endpoint, JobOrigin::Backfill)
                        .map(Some)
                });

            match outcome {
                Ok(Some(InsertOutcome::Created(job))) => {
                    debug!(
                        job_id = %job.id,
                        event_id = %event.id,
                        endpoint_id = %endpoint.id,
                        "Backfilled missing delivery"
                    );
                    report.created += 1;
                }
                // Duplicate: an organic job landed between the check and the insert.
                Ok(None) | Ok(Some(InsertOutcome::Duplicate)) => report.already_present += 1,
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        endpoint_id = %endpoint.id,
                        error = %e,
                        "Backfill failed for endpoint"
                    );
                    report.failures.push(ReconcileFailure {
                        event_id: event.id,
                        endpoint_id: Some(endpoint.id),
                        error: e.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockEndpointRegistry, SqliteEndpointRegistry, SqliteEventLog, SqliteJobStore};
    use crate::types::{Endpoint, JobStatus};
    use serde_json::json;

    struct Fixture {
        events: Arc<SqliteEventLog>,
        registry: Arc<SqliteEndpointRegistry>,
        jobs: Arc<SqliteJobStore>,
        reconciler: Reconciler,
    }

    fn fixture() -> Fixture {
        let events = Arc::new(SqliteEventLog::in_memory().unwrap());
        let registry = Arc::new(SqliteEndpointRegistry::in_memory().unwrap());
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let producer = Arc::new(JobProducer::new(registry.clone(), jobs.clone(), 5));
        let reconciler = Reconciler::new(events.clone(), registry.clone(), jobs.clone(), producer);
        Fixture {
            events,
            registry,
            jobs,
            reconciler,
        }
    }

    #[test]
    fn test_backfills_missed_event_once() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["compra.aprovada"]);
        f.registry.upsert(&ep).unwrap();
        let event = Event::new("compra.aprovada", json!({"order_id": "o-1"}));
        f.events.append(&event).unwrap();

        let first = f.reconciler.run_window(Duration::from_secs(3600)).unwrap();
        assert_eq!(first.events_scanned, 1);
        assert_eq!(first.created, 1);

        let job = &f.jobs.list_for_endpoint(ep.id, 10).unwrap()[0];
        assert_eq!(job.origin, JobOrigin::Backfill);
        assert_eq!(job.transaction_event_id, Some(event.id));

        let second = f.reconciler.run_window(Duration::from_secs(3600)).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_present, 1);
    }

    #[test]
    fn test_terminal_job_still_counts_as_present() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["compra.aprovada"]);
        f.registry.upsert(&ep).unwrap();
        let event = Event::new("compra.aprovada", json!({}));
        f.events.append(&event).unwrap();

        f.reconciler.run(Utc::now() - chrono::Duration::hours(1)).unwrap();
        let job = f.jobs.list_for_endpoint(ep.id, 10).unwrap().remove(0);
        let now = Utc::now();
        let claim = Uuid::new_v4();
        f.jobs.try_claim(job.id, claim, now).unwrap().unwrap();
        f.jobs.mark_succeeded(job.id, claim, 1, now).unwrap();

        let report = f.reconciler.run(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(f.jobs.count_by_status().unwrap().get(&JobStatus::Succeeded), Some(&1));
    }

    #[test]
    fn test_events_outside_window_are_ignored() {
        let f = fixture();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["compra.aprovada"]);
        f.registry.upsert(&ep).unwrap();
        let old = Event::new("compra.aprovada", json!({}))
            .with_created_at(Utc::now() - chrono::Duration::days(3));
        f.events.append(&old).unwrap();

        let report = f.reconciler.run_window(Duration::from_secs(24 * 3600)).unwrap();
        assert_eq!(report.events_scanned, 0);
        assert!(f.jobs.list_for_endpoint(ep.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_registry_failure_is_recorded_and_run_continues() {
        let events = Arc::new(SqliteEventLog::in_memory().unwrap());
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["pix.gerado"]);

        let mut registry = MockEndpointRegistry::new();
        let ok_ep = ep.clone();
        registry
            .expect_list_active_endpoints()
            .returning(move |event_type, _| match event_type {
                "pix.gerado" => Ok(vec![ok_ep.clone()]),
                _ => Err(CourierError::database("registry offline")),
            });
        let registry = Arc::new(registry);

        let producer = Arc::new(JobProducer::new(registry.clone(), jobs.clone(), 5));
        let reconciler = Reconciler::new(events.clone(), registry, jobs.clone(), producer);

        let broken = Event::new("compra.aprovada", json!({}))
            .with_created_at(Utc::now() - chrono::Duration::minutes(2));
        let fine = Event::new("pix.gerado", json!({}))
            .with_created_at(Utc::now() - chrono::Duration::minutes(1));
        events.append(&broken).unwrap();
        events.append(&fine).unwrap();

        let report = reconciler.run(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(report.events_scanned, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].event_id, broken.id);
        assert!(report.failures[0].endpoint_id.is_none());
    }
}
