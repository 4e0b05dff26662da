//! Configuration system for courier.
//!
//! The batch size, concurrency and backoff constants of the delivery worker
//! are all configuration, not code: deployments tune them to their
//! receivers and invocation budget.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CourierError, CourierResult, ErrorCode};
use crate::signer::SIGNATURE_HEADER;

/// Where the stores keep their tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file shared by all stores.
    pub path: PathBuf,
    /// Use private in-memory databases instead of `path` (tests, demos).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let courier_dir = dirs::home_dir()
            .map(|h| h.join(".courier"))
            .unwrap_or_else(|| PathBuf::from(".courier"));

        Self {
            path: courier_dir.join("courier.db"),
            in_memory: false,
        }
    }
}

/// Delivery worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum jobs claimed per pass.
    pub batch_size: usize,
    /// Jobs delivered concurrently within a pass.
    pub max_concurrency: usize,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    /// A job left in `delivering` longer than this is returned to `pending`.
    pub stale_claim_secs: u64,
    /// Seconds between scheduled passes.
    pub poll_interval_secs: u64,
    /// Largest response body kept in the delivery log, in bytes.
    pub max_response_body_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrency: 8,
            request_timeout_secs: 10,
            stale_claim_secs: 300,
            poll_interval_secs: 30,
            max_response_body_bytes: 4096,
        }
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stale_claim_after(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }
}

/// Retry and attempt limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts for jobs created from real events (organic and backfill).
    pub organic_max_attempts: u32,
    /// Attempts for replay and test deliveries. Single-shot by default.
    pub replay_max_attempts: u32,
    /// Backoff base delay in seconds.
    pub base_delay_secs: u64,
    /// Backoff ceiling in seconds.
    pub max_delay_secs: u64,
    /// Fraction of the delay that jitter may remove, in `[0, 1]`.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            organic_max_attempts: 6,
            replay_max_attempts: 1,
            base_delay_secs: 30,
            max_delay_secs: 3600,
            jitter_ratio: 0.2,
        }
    }
}

/// Backfill reconciler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Run the reconciler on a schedule.
    pub enabled: bool,
    /// Minutes between runs.
    pub interval_minutes: u64,
    /// How far back each run scans the event log.
    pub lookback_minutes: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: 15,
            lookback_minutes: 24 * 60,
        }
    }
}

/// Request signing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Header carrying the hex HMAC-SHA256 of the body.
    pub header: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            header: SIGNATURE_HEADER.to_string(),
        }
    }
}

/// Main courier configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub reconciler: ReconcilerConfig,
    pub signing: SigningConfig,
}

impl CourierConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<std::path::Path>) -> CourierResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => toml::from_str(&content).map_err(invalid_file)?,
            Some("json") => serde_json::from_str(&content).map_err(invalid_file)?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(invalid_file)?,
            _ => {
                return Err(CourierError::configuration(
                    ErrorCode::CfgInvalidFile,
                    "Unsupported config file format. Use .toml, .json, or .yaml",
                ))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `COURIER_*` environment variables.
    pub fn from_env() -> CourierResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply `COURIER_*` overrides from an arbitrary lookup on top of the
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CourierResult<Self> {
        Self::default().with_overrides(lookup)
    }

    /// Apply `COURIER_*` environment overrides on top of this configuration.
    pub fn with_env_overrides(self) -> CourierResult<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `COURIER_*` overrides from an arbitrary lookup.
    ///
    /// Reads:
    /// - `COURIER_DB_PATH`, `COURIER_DB_IN_MEMORY`
    /// - `COURIER_WORKER_BATCH_SIZE`, `COURIER_WORKER_CONCURRENCY`
    /// - `COURIER_REQUEST_TIMEOUT_SECS`, `COURIER_STALE_CLAIM_SECS`,
    ///   `COURIER_POLL_INTERVAL_SECS`
    /// - `COURIER_MAX_ATTEMPTS`, `COURIER_REPLAY_MAX_ATTEMPTS`,
    ///   `COURIER_RETRY_BASE_SECS`, `COURIER_RETRY_MAX_SECS`
    /// - `COURIER_BACKFILL_INTERVAL_MINUTES`, `COURIER_BACKFILL_LOOKBACK_MINUTES`,
    ///   `COURIER_DISABLE_BACKFILL`
    /// - `COURIER_SIGNATURE_HEADER`
    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> CourierResult<Self> {
        let mut config = self;

        if let Some(path) = lookup("COURIER_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }
        if lookup("COURIER_DB_IN_MEMORY").is_some() {
            config.database.in_memory = true;
        }

        parse_into(&lookup, "COURIER_WORKER_BATCH_SIZE", &mut config.worker.batch_size)?;
        parse_into(&lookup, "COURIER_WORKER_CONCURRENCY", &mut config.worker.max_concurrency)?;
        parse_into(&lookup, "COURIER_REQUEST_TIMEOUT_SECS", &mut config.worker.request_timeout_secs)?;
        parse_into(&lookup, "COURIER_STALE_CLAIM_SECS", &mut config.worker.stale_claim_secs)?;
        parse_into(&lookup, "COURIER_POLL_INTERVAL_SECS", &mut config.worker.poll_interval_secs)?;

        parse_into(&lookup, "COURIER_MAX_ATTEMPTS", &mut config.retry.organic_max_attempts)?;
        parse_into(&lookup, "COURIER_REPLAY_MAX_ATTEMPTS", &mut config.retry.replay_max_attempts)?;
        parse_into(&lookup, "COURIER_RETRY_BASE_SECS", &mut config.retry.base_delay_secs)?;
        parse_into(&lookup, "COURIER_RETRY_MAX_SECS", &mut config.retry.max_delay_secs)?;

        parse_into(
            &lookup,
            "COURIER_BACKFILL_INTERVAL_MINUTES",
            &mut config.reconciler.interval_minutes,
        )?;
        parse_into(
            &lookup,
            "COURIER_BACKFILL_LOOKBACK_MINUTES",
            &mut config.reconciler.lookback_minutes,
        )?;
        if lookup("COURIER_DISABLE_BACKFILL").is_some() {
            config.reconciler.enabled = false;
        }

        if let Some(header) = lookup("COURIER_SIGNATURE_HEADER") {
            config.signing.header = header;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build configuration using builder pattern.
    pub fn builder() -> CourierConfigBuilder {
        CourierConfigBuilder::default()
    }

    /// Reject settings the worker cannot run with.
    pub fn validate(&self) -> CourierResult<()> {
        let invalid = |msg: &str| Err(CourierError::validation(msg.to_string()));

        if self.worker.batch_size == 0 {
            return invalid("worker.batch_size must be at least 1");
        }
        if self.worker.max_concurrency == 0 {
            return invalid("worker.max_concurrency must be at least 1");
        }
        if self.worker.request_timeout_secs == 0 {
            return invalid("worker.request_timeout_secs must be at least 1");
        }
        if self.worker.poll_interval_secs == 0 {
            return invalid("worker.poll_interval_secs must be at least 1");
        }
        if self.worker.stale_claim_secs <= self.worker.request_timeout_secs {
            return invalid("worker.stale_claim_secs must exceed worker.request_timeout_secs");
        }
        if self.retry.organic_max_attempts == 0 || self.retry.replay_max_attempts == 0 {
            return invalid("retry max attempts must be at least 1");
        }
        if self.retry.base_delay_secs == 0 || self.retry.base_delay_secs > self.retry.max_delay_secs
        {
            return invalid("retry.base_delay_secs must be in 1..=retry.max_delay_secs");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return invalid("retry.jitter_ratio must be within [0, 1]");
        }
        if self.reconciler.interval_minutes == 0 {
            return invalid("reconciler.interval_minutes must be at least 1");
        }
        if self.signing.header.trim().is_empty() {
            return invalid("signing.header must not be empty");
        }
        Ok(())
    }
}

fn invalid_file(err: impl std::fmt::Display) -> CourierError {
    CourierError::configuration(ErrorCode::CfgInvalidFile, err.to_string())
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> CourierResult<()> {
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| CourierError::validation(format!("{} has invalid value '{}'", key, raw)))?;
    }
    Ok(())
}

/// Builder for CourierConfig.
#[derive(Default)]
pub struct CourierConfigBuilder {
    config: CourierConfig,
}

impl CourierConfigBuilder {
    /// Use in-memory databases.
    pub fn in_memory(mut self) -> Self {
        self.config.database.in_memory = true;
        self
    }

    /// Set the database file.
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database.path = path.into();
        self.config.database.in_memory = false;
        self
    }

    /// Set worker configuration.
    pub fn worker(mut self, worker: WorkerConfig) -> Self {
        self.config.worker = worker;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set reconciler configuration.
    pub fn reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.config.reconciler = reconciler;
        self
    }

    /// Set the signature header name.
    pub fn signature_header(mut self, header: impl Into<String>) -> Self {
        self.config.signing.header = header.into();
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> CourierResult<CourierConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
