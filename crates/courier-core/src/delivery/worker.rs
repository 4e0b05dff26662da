//! The delivery worker: claim due jobs, sign, POST, record the outcome.
//!
//! A pass never waits between retries. A failed attempt moves the job back
//! to `pending` with a later `next_attempt_at`, and some future pass picks
//! it up. Passes may overlap, in this process or another one sharing the
//! database. Each job is claimed with a conditional update just before it
//! is sent, under a token only this pass knows, so only one pass ever sends
//! a given attempt and only the claim holder can record its outcome.

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::transport::{TransportRequest, WebhookTransport};
use crate::config::{CourierConfig, WorkerConfig};
use crate::error::{CourierError, CourierResult};
use crate::signer::{self, DELIVERY_HEADER, EVENT_HEADER};
use crate::store::{DeliveryLogStore, EndpointRegistry, JobStore};
use crate::types::{DeliveryJob, DeliveryLogEntry, DeliveryOutcome, Endpoint};

/// Counters for one worker pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Stale claims returned to `pending` before claiming.
    pub recovered: usize,
    /// Jobs this pass claimed.
    pub claimed: usize,
    /// Candidates another pass claimed first.
    pub claim_conflicts: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub exhausted: usize,
    pub failed: usize,
    /// Store errors, and claims lost before an outcome could be recorded.
    pub errors: usize,
}

impl PassReport {
    fn record(&mut self, result: JobResult) {
        match result {
            JobResult::Conflict => self.claim_conflicts += 1,
            JobResult::ClaimError => self.errors += 1,
            outcome => {
                self.claimed += 1;
                match outcome {
                    JobResult::Succeeded => self.succeeded += 1,
                    JobResult::Retried => self.retried += 1,
                    JobResult::Exhausted => self.exhausted += 1,
                    JobResult::Failed => self.failed += 1,
                    _ => self.errors += 1,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobResult {
    /// Another pass claimed the candidate first.
    Conflict,
    /// The claim itself could not be written.
    ClaimError,
    Succeeded,
    Retried,
    Exhausted,
    Failed,
    /// The claim was superseded (the watchdog recovered it).
    Lost,
    Error,
}

/// Handle for requesting an immediate worker pass.
#[derive(Debug, Clone, Default)]
pub struct WorkerTrigger {
    notify: Arc<Notify>,
}

impl WorkerTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a pass. Requests made while no one is waiting coalesce into one.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Wait until a pass is requested.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Pass-relative clock: the pass's notion of `now` advanced by real time
/// spent since the pass began.
#[derive(Debug, Clone, Copy)]
struct PassClock {
    now: DateTime<Utc>,
    started: Instant,
}

impl PassClock {
    fn at(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.now + elapsed
    }
}

/// A job this pass holds, with the token that proves it.
struct Claim {
    job: DeliveryJob,
    token: Uuid,
}

/// Delivery worker.
pub struct DeliveryWorker {
    jobs: Arc<dyn JobStore>,
    logs: Arc<dyn DeliveryLogStore>,
    registry: Arc<dyn EndpointRegistry>,
    transport: Arc<dyn WebhookTransport>,
    backoff: BackoffPolicy,
    config: WorkerConfig,
    signature_header: String,
}

impl DeliveryWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        logs: Arc<dyn DeliveryLogStore>,
        registry: Arc<dyn EndpointRegistry>,
        transport: Arc<dyn WebhookTransport>,
        config: &CourierConfig,
    ) -> Self {
        Self {
            jobs,
            logs,
            registry,
            transport,
            backoff: BackoffPolicy::from(&config.retry),
            config: config.worker.clone(),
            signature_header: config.signing.header.clone(),
        }
    }

    /// Builder: override the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one pass against the current time.
    pub async fn run_pass(&self) -> CourierResult<PassReport> {
        self.run_pass_at(Utc::now()).await
    }

    /// Run one pass treating `now` as the time the pass starts.
    ///
    /// Claims and outcomes are stamped with `now` plus the real time
    /// elapsed since, so a job waiting its turn behind slow deliveries is
    /// claimed when it is dispatched, not when the pass started. Only
    /// failures to recover or list candidates abort the pass; per-job
    /// problems are counted in the report.
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> CourierResult<PassReport> {
        let clock = PassClock {
            now,
            started: Instant::now(),
        };
        let mut report = PassReport::default();

        let stale_after = chrono::Duration::from_std(self.config.stale_claim_after())
            .map_err(|e| CourierError::validation(format!("stale claim threshold: {}", e)))?;
        report.recovered = self.jobs.recover_stale(now - stale_after, now)?;
        if report.recovered > 0 {
            warn!(recovered = report.recovered, "Recovered stale delivery claims");
        }

        let candidates = self.jobs.due_candidates(now, self.config.batch_size)?;
        let results: Vec<JobResult> = stream::iter(candidates)
            .map(|id| self.process(id, clock))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        for result in results {
            report.record(result);
        }

        if report.claimed > 0 || report.recovered > 0 {
            info!(
                claimed = report.claimed,
                claim_conflicts = report.claim_conflicts,
                succeeded = report.succeeded,
                retried = report.retried,
                exhausted = report.exhausted,
                failed = report.failed,
                errors = report.errors,
                duration_ms = clock.started.elapsed().as_millis() as u64,
                "Delivery pass complete"
            );
        } else {
            debug!(claim_conflicts = report.claim_conflicts, "Delivery pass found nothing due");
        }
        Ok(report)
    }

    async fn process(&self, id: Uuid, clock: PassClock) -> JobResult {
        let claim_id = Uuid::new_v4();
        let job = match self.jobs.try_claim(id, claim_id, clock.at()) {
            Ok(Some(job)) => job,
            Ok(None) => return JobResult::Conflict,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Claim failed");
                return JobResult::ClaimError;
            }
        };
        let claim = Claim {
            job,
            token: claim_id,
        };

        let endpoint = match self.registry.get_endpoint(claim.job.webhook_endpoint_id) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                // Left in `delivering`; the watchdog returns it to `pending`.
                warn!(job_id = %id, error = %e, "Endpoint lookup failed");
                return JobResult::Error;
            }
        };

        match self.prepare(&claim.job, endpoint.as_ref()) {
            Ok(request) => self.send(&claim, request, clock).await,
            Err(reason) => self.fail(&claim, &reason, clock.at()),
        }
    }

    /// Pre-flight checks. Any failure here is a configuration problem that
    /// would fail identically on every attempt.
    fn prepare(
        &self,
        job: &DeliveryJob,
        endpoint: Option<&Endpoint>,
    ) -> Result<TransportRequest, String> {
        let endpoint = endpoint.ok_or_else(|| "endpoint no longer exists".to_string())?;
        if !endpoint.is_active {
            return Err("endpoint is disabled".to_string());
        }

        let url = Url::parse(&endpoint.url).map_err(|e| format!("invalid endpoint URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported URL scheme '{}'", url.scheme()));
        }

        let body = serde_json::to_vec(&job.payload)
            .map_err(|e| format!("payload cannot be serialized: {}", e))?;
        let signature = signer::sign_for(endpoint, &body).map_err(|e| e.to_string())?;

        Ok(TransportRequest {
            url: url.to_string(),
            headers: vec![
                (self.signature_header.clone(), signature),
                (EVENT_HEADER.to_string(), job.event_type.clone()),
                (DELIVERY_HEADER.to_string(), job.id.to_string()),
            ],
            body,
        })
    }

    fn fail(&self, claim: &Claim, reason: &str, now: DateTime<Utc>) -> JobResult {
        let job = &claim.job;
        warn!(
            job_id = %job.id,
            endpoint_id = %job.webhook_endpoint_id,
            event_type = %job.event_type,
            reason,
            "Delivery rejected before sending"
        );

        let result = match self.jobs.mark_failed(job.id, claim.token, reason, now) {
            Ok(true) => JobResult::Failed,
            Ok(false) => {
                warn!(job_id = %job.id, "Claim lost before recording the rejection");
                return JobResult::Lost;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to mark job failed");
                return JobResult::Error;
            }
        };

        let entry = self
            .entry_for(job, DeliveryOutcome::ConfigError)
            .with_error(reason)
            .at(now);
        if let Err(e) = self.logs.append(&entry) {
            warn!(job_id = %job.id, error = %e, "Failed to write delivery log");
        }
        result
    }

    async fn send(&self, claim: &Claim, request: TransportRequest, clock: PassClock) -> JobResult {
        let job = &claim.job;
        let attempt = job.attempts + 1;
        debug!(
            job_id = %job.id,
            endpoint_id = %job.webhook_endpoint_id,
            attempt,
            max_attempts = job.max_attempts,
            "Sending webhook"
        );

        let response = self.transport.post(request).await;
        let now = clock.at();
        match response {
            Ok(response) if response.is_success() => {
                let entry = self
                    .entry_for(job, DeliveryOutcome::Success)
                    .with_status(response.status)
                    .with_response_body(response.body)
                    .with_duration_ms(response.duration.as_millis() as u64)
                    .with_attempt(attempt)
                    .at(now);
                self.record_success(claim, &entry, attempt, now).await
            }
            Ok(response) => {
                let error = format!("HTTP {}", response.status);
                let entry = self
                    .entry_for(job, DeliveryOutcome::HttpError)
                    .with_status(response.status)
                    .with_error(error.clone())
                    .with_response_body(response.body)
                    .with_duration_ms(response.duration.as_millis() as u64)
                    .with_attempt(attempt)
                    .at(now);
                self.record_failure(claim, &entry, attempt, &error, now).await
            }
            Err(err) => {
                let error = err.to_string();
                let entry = self
                    .entry_for(job, DeliveryOutcome::TransportError)
                    .with_error(error.clone())
                    .with_attempt(attempt)
                    .at(now);
                self.record_failure(claim, &entry, attempt, &error, now).await
            }
        }
    }

    /// A job only becomes `succeeded` once its success entry is stored. If
    /// the entry cannot be written the job stays claimed and the watchdog
    /// sends it again.
    async fn record_success(
        &self,
        claim: &Claim,
        entry: &DeliveryLogEntry,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> JobResult {
        let job = &claim.job;
        if let Err(e) = self.append_entry(entry).await {
            warn!(job_id = %job.id, error = %e, "Delivered, but failed to log the success");
            return JobResult::Error;
        }

        let mark = || async { self.jobs.mark_succeeded(job.id, claim.token, attempt, now) };
        match mark.retry(write_retry()).when(CourierError::is_retryable).await {
            Ok(true) => {
                info!(
                    job_id = %job.id,
                    endpoint_id = %job.webhook_endpoint_id,
                    event_type = %job.event_type,
                    attempt,
                    "Webhook delivered"
                );
                JobResult::Succeeded
            }
            Ok(false) => {
                warn!(job_id = %job.id, "Delivered, but the claim was lost before recording it");
                JobResult::Lost
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Delivered, but failed to record success");
                JobResult::Error
            }
        }
    }

    /// The transition lands first and the entry is written only if it did,
    /// so an attempt that was never counted leaves no log entry behind.
    async fn record_failure(
        &self,
        claim: &Claim,
        entry: &DeliveryLogEntry,
        attempt: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> JobResult {
        let job = &claim.job;
        let (moved, result) = if attempt >= job.max_attempts {
            (
                self.jobs.mark_exhausted(job.id, claim.token, attempt, error, now),
                JobResult::Exhausted,
            )
        } else {
            let delay = self.backoff.delay_with_random_jitter(job.attempts);
            let next_attempt_at = now + chrono::Duration::milliseconds(delay.as_millis() as i64);
            (
                self.jobs
                    .schedule_retry(job.id, claim.token, attempt, next_attempt_at, error, now),
                JobResult::Retried,
            )
        };

        match moved {
            Ok(true) => {}
            Ok(false) => {
                warn!(job_id = %job.id, "Claim lost before recording the failed attempt");
                return JobResult::Lost;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Failed to record failed attempt");
                return JobResult::Error;
            }
        }

        warn!(
            job_id = %job.id,
            endpoint_id = %job.webhook_endpoint_id,
            attempt,
            max_attempts = job.max_attempts,
            error,
            exhausted = result == JobResult::Exhausted,
            "Webhook delivery failed"
        );
        if let Err(e) = self.append_entry(entry).await {
            warn!(job_id = %job.id, error = %e, "Failed to write delivery log");
        }
        result
    }

    async fn append_entry(&self, entry: &DeliveryLogEntry) -> CourierResult<()> {
        let append = || async { self.logs.append(entry) };
        append
            .retry(write_retry())
            .when(CourierError::is_retryable)
            .await
    }

    fn entry_for(&self, job: &DeliveryJob, outcome: DeliveryOutcome) -> DeliveryLogEntry {
        DeliveryLogEntry::new(
            job.webhook_endpoint_id,
            job.id,
            job.event_type.clone(),
            job.payload.clone(),
            outcome,
        )
    }
}

fn write_retry() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ReqwestTransport;
    use crate::store::{
        MockDeliveryLogStore, MockJobStore, SqliteDeliveryLogStore, SqliteEndpointRegistry,
        SqliteJobStore,
    };
    use crate::types::{JobOrigin, JobStatus, NewJob};
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        jobs: Arc<SqliteJobStore>,
        logs: Arc<SqliteDeliveryLogStore>,
        registry: Arc<SqliteEndpointRegistry>,
        worker: DeliveryWorker,
    }

    fn harness() -> Harness {
        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let logs = Arc::new(SqliteDeliveryLogStore::in_memory().unwrap());
        let registry = Arc::new(SqliteEndpointRegistry::in_memory().unwrap());
        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(2), 1024).unwrap());
        let worker = DeliveryWorker::new(
            jobs.clone(),
            logs.clone(),
            registry.clone(),
            transport,
            &CourierConfig::default(),
        );
        Harness {
            jobs,
            logs,
            registry,
            worker,
        }
    }

    fn enqueue(h: &Harness, endpoint: &Endpoint, max_attempts: u32) -> DeliveryJob {
        insert_due(&h.jobs, endpoint, max_attempts)
    }

    fn insert_due(jobs: &SqliteJobStore, endpoint: &Endpoint, max_attempts: u32) -> DeliveryJob {
        let job = NewJob::new(
            endpoint.id,
            "compra.aprovada",
            json!({"order_id": "o-1"}),
            JobOrigin::Organic,
            max_attempts,
        )
        .due_at(Utc::now() - chrono::Duration::seconds(1));
        match jobs.insert(job).unwrap() {
            crate::store::InsertOutcome::Created(job) => job,
            crate::store::InsertOutcome::Duplicate => panic!("unexpected duplicate"),
        }
    }

    #[tokio::test]
    async fn test_signature_header_matches_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness();
        let endpoint = Endpoint::new("prod-1", server.uri(), "whsec_test");
        h.registry.upsert(&endpoint).unwrap();
        let job = enqueue(&h, &endpoint, 3);

        let report = h.worker.run_pass().await.unwrap();
        assert_eq!(report.succeeded, 1);

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let signature = request.headers.get("x-courier-signature").unwrap().to_str().unwrap();
        assert!(signer::verify("whsec_test", &request.body, signature));
        assert_eq!(
            request.headers.get("x-courier-delivery").unwrap().to_str().unwrap(),
            job.id.to_string()
        );
    }

    #[tokio::test]
    async fn test_missing_secret_fails_without_attempt() {
        let h = harness();
        let endpoint = Endpoint::new("prod-1", "https://example.invalid/hook", "");
        h.registry.upsert(&endpoint).unwrap();
        let job = enqueue(&h, &endpoint, 3);

        let report = h.worker.run_pass().await.unwrap();
        assert_eq!(report.failed, 1);

        let job = h.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 0);
        assert!(job.last_error.unwrap().contains("signing secret"));

        let entries = h.logs.list_for_job(job.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, DeliveryOutcome::ConfigError);
    }

    #[tokio::test]
    async fn test_bad_scheme_and_disabled_endpoint_fail() {
        let h = harness();
        let ftp = Endpoint::new("prod-1", "ftp://example.com/hook", "s");
        let disabled = Endpoint::new("prod-1", "https://example.com/hook", "s").with_active(false);
        h.registry.upsert(&ftp).unwrap();
        h.registry.upsert(&disabled).unwrap();
        let a = enqueue(&h, &ftp, 3);
        let b = enqueue(&h, &disabled, 3);

        let report = h.worker.run_pass().await.unwrap();
        assert_eq!(report.failed, 2);
        for id in [a.id, b.id] {
            assert_eq!(h.jobs.get(id).unwrap().unwrap().status, JobStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_unknown_endpoint_fails() {
        let h = harness();
        let ghost = Endpoint::new("prod-1", "https://example.com/hook", "s");
        let job = enqueue(&h, &ghost, 3);

        let report = h.worker.run_pass().await.unwrap();
        assert_eq!(report.failed, 1);
        let job = h.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.last_error.as_deref(), Some("endpoint no longer exists"));
    }

    #[tokio::test]
    async fn test_transport_error_schedules_retry() {
        let h = harness();
        let endpoint = Endpoint::new("prod-1", "http://127.0.0.1:9/hook", "s");
        h.registry.upsert(&endpoint).unwrap();
        let job = enqueue(&h, &endpoint, 3);

        let now = Utc::now();
        let report = h.worker.run_pass_at(now).await.unwrap();
        assert_eq!(report.retried, 1);

        let job = h.jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.next_attempt_at > now);

        let entries = h.logs.list_for_job(job.id).unwrap();
        assert_eq!(entries[0].outcome, DeliveryOutcome::TransportError);
        assert!(entries[0].response_status.is_none());
    }

    #[tokio::test]
    async fn test_nothing_due_is_a_quiet_pass() {
        let h = harness();
        let report = h.worker.run_pass().await.unwrap();
        assert_eq!(report, PassReport::default());
    }

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let trigger = WorkerTrigger::new();
        let waiter = trigger.clone();
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter.notified())
            .await
            .unwrap();
    }

    fn worker_with(
        jobs: Arc<dyn JobStore>,
        logs: Arc<dyn DeliveryLogStore>,
        registry: Arc<dyn EndpointRegistry>,
    ) -> DeliveryWorker {
        let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(2), 1024).unwrap());
        DeliveryWorker::new(jobs, logs, registry, transport, &CourierConfig::default())
    }

    #[tokio::test]
    async fn test_success_without_log_entry_stays_delivering() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let jobs = Arc::new(SqliteJobStore::in_memory().unwrap());
        let registry = Arc::new(SqliteEndpointRegistry::in_memory().unwrap());
        let endpoint = Endpoint::new("prod-1", server.uri(), "whsec_test");
        registry.upsert(&endpoint).unwrap();
        let job = insert_due(&jobs, &endpoint, 3);

        let mut logs = MockDeliveryLogStore::new();
        logs.expect_append()
            .returning(|_| Err(CourierError::database("disk I/O error")));

        let worker = worker_with(jobs.clone(), Arc::new(logs), registry);
        let report = worker.run_pass().await.unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.errors, 1);

        let job = jobs.get(job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Delivering);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_unrecorded_failure_writes_no_log_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let registry = Arc::new(SqliteEndpointRegistry::in_memory().unwrap());
        let endpoint = Endpoint::new("prod-1", server.uri(), "whsec_test");
        registry.upsert(&endpoint).unwrap();

        let job = NewJob::new(
            endpoint.id,
            "compra.aprovada",
            json!({"order_id": "o-1"}),
            JobOrigin::Organic,
            3,
        )
        .into_job(Utc::now());
        let job_id = job.id;

        let mut jobs = MockJobStore::new();
        jobs.expect_recover_stale().returning(|_, _| Ok(0));
        jobs.expect_due_candidates()
            .returning(move |_, _| Ok(vec![job_id]));
        jobs.expect_try_claim()
            .times(1)
            .returning(move |_, token, now| {
                let mut claimed = job.clone();
                claimed.status = JobStatus::Delivering;
                claimed.claim_id = Some(token);
                claimed.claimed_at = Some(now);
                Ok(Some(claimed))
            });
        jobs.expect_schedule_retry()
            .times(1)
            .returning(|_, _, _, _, _, _| Err(CourierError::database("database is locked")));
        jobs.expect_mark_exhausted().never();

        let logs = Arc::new(SqliteDeliveryLogStore::in_memory().unwrap());
        let worker = worker_with(Arc::new(jobs), logs.clone(), registry);
        let report = worker.run_pass().await.unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.retried, 0);
        assert_eq!(report.errors, 1);
        assert!(logs.list_for_job(job_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_superseded_claim_is_reported_lost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = Arc::new(SqliteEndpointRegistry::in_memory().unwrap());
        let endpoint = Endpoint::new("prod-1", server.uri(), "whsec_test");
        registry.upsert(&endpoint).unwrap();

        let job = NewJob::new(
            endpoint.id,
            "compra.aprovada",
            json!({"order_id": "o-1"}),
            JobOrigin::Organic,
            3,
        )
        .into_job(Utc::now());
        let job_id = job.id;

        let mut jobs = MockJobStore::new();
        jobs.expect_recover_stale().returning(|_, _| Ok(0));
        jobs.expect_due_candidates()
            .returning(move |_, _| Ok(vec![job_id]));
        jobs.expect_try_claim().returning(move |_, token, now| {
            let mut claimed = job.clone();
            claimed.status = JobStatus::Delivering;
            claimed.claim_id = Some(token);
            claimed.claimed_at = Some(now);
            Ok(Some(claimed))
        });
        jobs.expect_mark_succeeded()
            .times(1)
            .returning(|_, _, _, _| Ok(false));

        let logs = Arc::new(SqliteDeliveryLogStore::in_memory().unwrap());
        let worker = worker_with(Arc::new(jobs), logs.clone(), registry);
        let report = worker.run_pass().await.unwrap();

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.errors, 1);
    }
}
