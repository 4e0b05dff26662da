//! courier-core - Core library for courier.
//!
//! Durable, signed, at-least-once delivery of producer events to their
//! registered webhook endpoints: job and log stores, the enqueueing
//! producer, the delivery worker, backfill reconciliation and replay.
//!
//! # Example
//!
//! ```ignore
//! use courier_core::{CourierConfig, DeliveryRuntime, Event};
//!
//! let mut runtime = DeliveryRuntime::new(CourierConfig::default()).await?;
//! runtime.start().await?;
//!
//! // Record an event and enqueue one job per subscribed endpoint
//! let report = runtime.ingest(&Event::new("compra.aprovada", metadata))?;
//!
//! // Or drive the worker directly
//! let pass = runtime.worker().run_pass().await?;
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod producer;
pub mod reconciler;
pub mod replay;
pub mod runtime;
pub mod signer;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::CourierConfig;
pub use delivery::{
    BackoffPolicy, DeliveryWorker, PassReport, ReqwestTransport, WebhookTransport, WorkerTrigger,
};
pub use error::{CourierError, CourierResult, ErrorCode};
pub use producer::{EnqueueReport, JobProducer};
pub use reconciler::{ReconcileFailure, ReconcileReport, Reconciler};
pub use replay::{test_payload, ReplayService};
pub use runtime::{DeliveryRuntime, Stores};
pub use store::{
    DeliveryLogStore, EndpointRegistry, EventLog, InsertOutcome, JobStore, SqliteDeliveryLogStore,
    SqliteEndpointRegistry, SqliteEventLog, SqliteJobStore,
};
pub use types::{
    DeliveryJob, DeliveryLogEntry, DeliveryOutcome, Endpoint, EndpointSummary, Event, EventKind,
    JobOrigin, JobStatus, NewJob,
};
