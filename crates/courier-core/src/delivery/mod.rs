//! Webhook delivery: backoff policy, HTTP transport and the worker that
//! drives jobs through their lifecycle.

mod backoff;
mod transport;
mod worker;

pub use backoff::BackoffPolicy;
pub use transport::{
    ReqwestTransport, TransportError, TransportRequest, TransportResponse, WebhookTransport,
    USER_AGENT,
};
pub use worker::{DeliveryWorker, PassReport, WorkerTrigger};
