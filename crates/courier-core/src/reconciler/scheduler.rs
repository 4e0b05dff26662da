//! Periodic scheduler for backfill runs.
//!
//! Uses tokio-cron-scheduler to run the reconciler over a trailing window
//! at regular intervals.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info};

use super::Reconciler;
use crate::config::ReconcilerConfig;

/// Configuration for the reconcile scheduler.
#[derive(Debug, Clone)]
pub struct ReconcileSchedulerConfig {
    /// Interval between runs in minutes (default: 15)
    pub interval_minutes: u64,
    /// How far back each run looks (default: 24 hours)
    pub lookback: Duration,
    /// Whether to run once immediately on start (default: false)
    pub run_on_start: bool,
}

impl Default for ReconcileSchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            lookback: Duration::from_secs(24 * 3600),
            run_on_start: false,
        }
    }
}

impl From<&ReconcilerConfig> for ReconcileSchedulerConfig {
    fn from(config: &ReconcilerConfig) -> Self {
        Self {
            interval_minutes: config.interval_minutes.max(1),
            lookback: Duration::from_secs(config.lookback_minutes * 60),
            run_on_start: false,
        }
    }
}

impl ReconcileSchedulerConfig {
    /// Enable running a backfill immediately on start.
    pub fn with_run_on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }
}

/// Scheduler for periodic backfill.
pub struct ReconcileScheduler {
    scheduler: JobScheduler,
    reconciler: Arc<Reconciler>,
    config: ReconcileSchedulerConfig,
}

impl ReconcileScheduler {
    /// Create a new scheduler. Call `start()` to begin periodic execution.
    pub async fn new(
        reconciler: Arc<Reconciler>,
        config: ReconcileSchedulerConfig,
    ) -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler,
            reconciler,
            config,
        })
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        let reconciler = self.reconciler.clone();
        let lookback = self.config.lookback;

        let job = Job::new_repeated_async(
            Duration::from_secs(self.config.interval_minutes * 60),
            move |_uuid, _lock| {
                let reconciler = reconciler.clone();
                Box::pin(async move {
                    debug!("Starting periodic backfill");
                    if let Err(e) = reconciler.run_window(lookback) {
                        error!(error = %e, "Backfill run failed");
                    }
                })
            },
        )?;

        self.scheduler.add(job).await?;

        if self.config.run_on_start {
            debug!("Running initial backfill on start");
            if let Err(e) = self.reconciler.run_window(lookback) {
                error!(error = %e, "Initial backfill failed");
            }
        }

        self.scheduler.start().await?;

        info!(
            interval_minutes = self.config.interval_minutes,
            lookback_secs = lookback.as_secs(),
            "Reconcile scheduler started"
        );

        Ok(())
    }

    /// Stop the scheduler gracefully.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        info!("Shutting down reconcile scheduler");
        self.scheduler.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_reconciler_settings() {
        let config = ReconcileSchedulerConfig::from(&ReconcilerConfig {
            enabled: true,
            interval_minutes: 0,
            lookback_minutes: 90,
        });
        assert_eq!(config.interval_minutes, 1);
        assert_eq!(config.lookback, Duration::from_secs(90 * 60));
        assert!(!config.run_on_start);
    }

    #[test]
    fn test_config_with_run_on_start() {
        let config = ReconcileSchedulerConfig::default().with_run_on_start();
        assert_eq!(config.interval_minutes, 15);
        assert!(config.run_on_start);
    }
}
