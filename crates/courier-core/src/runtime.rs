//! Background runtime for webhook delivery.
//!
//! Wires the stores, producer, worker, reconciler and replay service from a
//! [`CourierConfig`], and manages the background tasks that drive them:
//! a repeated worker pass, the trigger listener for on-demand passes, and
//! the periodic backfill.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use crate::config::{CourierConfig, DatabaseConfig};
use crate::delivery::{DeliveryWorker, ReqwestTransport, WebhookTransport, WorkerTrigger};
use crate::error::CourierResult;
use crate::producer::{EnqueueReport, JobProducer};
use crate::reconciler::{ReconcileScheduler, ReconcileSchedulerConfig, Reconciler};
use crate::replay::ReplayService;
use crate::store::{SqliteDeliveryLogStore, SqliteEndpointRegistry, SqliteEventLog, SqliteJobStore};
use crate::types::Event;

/// The SQLite stores behind a runtime.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<SqliteJobStore>,
    pub logs: Arc<SqliteDeliveryLogStore>,
    pub registry: Arc<SqliteEndpointRegistry>,
    pub events: Arc<SqliteEventLog>,
}

impl Stores {
    /// Open all stores on the configured database.
    pub fn open(config: &DatabaseConfig) -> CourierResult<Self> {
        if config.in_memory {
            debug!("Creating in-memory stores");
            return Ok(Self {
                jobs: Arc::new(SqliteJobStore::in_memory()?),
                logs: Arc::new(SqliteDeliveryLogStore::in_memory()?),
                registry: Arc::new(SqliteEndpointRegistry::in_memory()?),
                events: Arc::new(SqliteEventLog::in_memory()?),
            });
        }

        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %config.path.display(), "Opening file-backed stores");
        Ok(Self {
            jobs: Arc::new(SqliteJobStore::new(&config.path)?),
            logs: Arc::new(SqliteDeliveryLogStore::new(&config.path)?),
            registry: Arc::new(SqliteEndpointRegistry::new(&config.path)?),
            events: Arc::new(SqliteEventLog::new(&config.path)?),
        })
    }
}

/// Background runtime managing delivery components and their schedules.
///
/// # Example
///
/// ```ignore
/// use courier_core::{CourierConfig, DeliveryRuntime};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut runtime = DeliveryRuntime::new(CourierConfig::from_env()?).await?;
///     runtime.start().await?;
///
///     // ... application runs ...
///
///     runtime.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct DeliveryRuntime {
    stores: Stores,
    producer: Arc<JobProducer>,
    worker: Arc<DeliveryWorker>,
    reconciler: Arc<Reconciler>,
    replay: Arc<ReplayService>,
    trigger: WorkerTrigger,
    worker_scheduler: JobScheduler,
    reconcile_scheduler: Option<ReconcileScheduler>,
    listener: Option<JoinHandle<()>>,
    config: CourierConfig,
}

impl DeliveryRuntime {
    /// Create a runtime that delivers over HTTP with reqwest.
    ///
    /// Nothing runs until `start()` is called.
    pub async fn new(config: CourierConfig) -> CourierResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(
            config.worker.request_timeout(),
            config.worker.max_response_body_bytes,
        )?);
        Self::with_transport(config, transport).await
    }

    /// Create a runtime with a custom transport.
    pub async fn with_transport(
        config: CourierConfig,
        transport: Arc<dyn WebhookTransport>,
    ) -> CourierResult<Self> {
        config.validate()?;
        debug!(
            in_memory = config.database.in_memory,
            batch_size = config.worker.batch_size,
            max_concurrency = config.worker.max_concurrency,
            backfill_enabled = config.reconciler.enabled,
            "Creating DeliveryRuntime"
        );

        let stores = Stores::open(&config.database)?;
        let trigger = WorkerTrigger::new();

        let producer = Arc::new(JobProducer::new(
            stores.registry.clone(),
            stores.jobs.clone(),
            config.retry.organic_max_attempts,
        ));
        let worker = Arc::new(DeliveryWorker::new(
            stores.jobs.clone(),
            stores.logs.clone(),
            stores.registry.clone(),
            transport,
            &config,
        ));
        let reconciler = Arc::new(Reconciler::new(
            stores.events.clone(),
            stores.registry.clone(),
            stores.jobs.clone(),
            producer.clone(),
        ));
        let replay = Arc::new(ReplayService::new(
            stores.logs.clone(),
            stores.jobs.clone(),
            stores.registry.clone(),
            trigger.clone(),
            config.retry.replay_max_attempts,
        ));

        let worker_scheduler = JobScheduler::new().await?;
        let reconcile_scheduler = if config.reconciler.enabled {
            let scheduler_config = ReconcileSchedulerConfig::from(&config.reconciler);
            Some(ReconcileScheduler::new(reconciler.clone(), scheduler_config).await?)
        } else {
            None
        };

        Ok(Self {
            stores,
            producer,
            worker,
            reconciler,
            replay,
            trigger,
            worker_scheduler,
            reconcile_scheduler,
            listener: None,
            config,
        })
    }

    /// Start the background tasks.
    pub async fn start(&mut self) -> CourierResult<()> {
        debug!("Starting delivery runtime");

        let worker = self.worker.clone();
        let poll = Job::new_repeated_async(
            Duration::from_secs(self.config.worker.poll_interval_secs),
            move |_uuid, _lock| {
                let worker = worker.clone();
                Box::pin(async move {
                    if let Err(e) = worker.run_pass().await {
                        error!(error = %e, "Scheduled delivery pass failed");
                    }
                })
            },
        )?;
        self.worker_scheduler.add(poll).await?;
        self.worker_scheduler.start().await?;
        info!(
            poll_interval_secs = self.config.worker.poll_interval_secs,
            "Delivery worker scheduled"
        );

        let worker = self.worker.clone();
        let trigger = self.trigger.clone();
        self.listener = Some(tokio::spawn(async move {
            loop {
                trigger.notified().await;
                debug!("Running requested delivery pass");
                if let Err(e) = worker.run_pass().await {
                    error!(error = %e, "Requested delivery pass failed");
                }
            }
        }));

        if let Some(ref scheduler) = self.reconcile_scheduler {
            scheduler.start().await?;
        }

        info!("Delivery runtime started");
        Ok(())
    }

    /// Stop the background tasks.
    pub async fn shutdown(&mut self) -> CourierResult<()> {
        debug!("Shutting down delivery runtime");

        self.worker_scheduler.shutdown().await?;
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(ref mut scheduler) = self.reconcile_scheduler {
            scheduler.shutdown().await?;
        }

        info!("Delivery runtime stopped");
        Ok(())
    }

    /// Record an event and enqueue its deliveries.
    ///
    /// Re-ingesting a known event enqueues again, which the producer's
    /// dedup turns into duplicates for still-open jobs.
    pub fn ingest(&self, event: &Event) -> CourierResult<EnqueueReport> {
        if !self.stores.events.append(event)? {
            debug!(event_id = %event.id, "Event already recorded");
        }
        let report = self.producer.enqueue(event)?;
        if report.created > 0 {
            self.trigger.trigger();
        }
        Ok(report)
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn producer(&self) -> Arc<JobProducer> {
        self.producer.clone()
    }

    pub fn worker(&self) -> Arc<DeliveryWorker> {
        self.worker.clone()
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        self.reconciler.clone()
    }

    pub fn replay(&self) -> Arc<ReplayService> {
        self.replay.clone()
    }

    pub fn trigger(&self) -> WorkerTrigger {
        self.trigger.clone()
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::store::{EventLog, JobStore};
    use crate::types::{Endpoint, JobStatus};
    use serde_json::json;

    fn in_memory() -> CourierConfig {
        CourierConfig::builder().in_memory().build().unwrap()
    }

    #[tokio::test]
    async fn test_runtime_creation() {
        let runtime = DeliveryRuntime::new(in_memory()).await.unwrap();
        assert!(runtime.reconcile_scheduler.is_some());
        assert!(runtime.listener.is_none());
    }

    #[tokio::test]
    async fn test_runtime_without_backfill() {
        let config = CourierConfig::builder()
            .in_memory()
            .reconciler(ReconcilerConfig {
                enabled: false,
                ..Default::default()
            })
            .build()
            .unwrap();
        let runtime = DeliveryRuntime::new(config).await.unwrap();
        assert!(runtime.reconcile_scheduler.is_none());
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let mut runtime = DeliveryRuntime::new(in_memory()).await.unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.listener.is_some());
        runtime.shutdown().await.unwrap();
        assert!(runtime.listener.is_none());
    }

    #[tokio::test]
    async fn test_ingest_records_and_enqueues() {
        let runtime = DeliveryRuntime::new(in_memory()).await.unwrap();
        let ep = Endpoint::new("prod-1", "https://a.example/hook", "s").with_events(["compra.aprovada"]);
        runtime.stores().registry.upsert(&ep).unwrap();

        let event = Event::new("compra.aprovada", json!({"order_id": "o-1"}));
        assert_eq!(runtime.ingest(&event).unwrap().created, 1);
        assert_eq!(runtime.ingest(&event).unwrap().duplicates, 1);

        let counts = runtime.stores().jobs.count_by_status().unwrap();
        assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
        assert!(runtime.stores().events.get_event(event.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_backed_stores_share_one_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = CourierConfig::builder()
            .database_path(dir.path().join("nested").join("courier.db"))
            .build()
            .unwrap();
        let runtime = DeliveryRuntime::new(config).await.unwrap();
        assert!(dir.path().join("nested").join("courier.db").exists());
        assert!(runtime.stores().jobs.count_by_status().unwrap().is_empty());
    }
}
