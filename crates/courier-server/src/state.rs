//! Server state management.

use std::sync::Arc;

use courier_core::DeliveryRuntime;
use tokio::sync::RwLock;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<RwLock<AppStateInner>>,
}

pub struct AppStateInner {
    pub runtime: Option<DeliveryRuntime>,
}

impl AppState {
    /// Create state around a delivery runtime.
    pub fn new(runtime: DeliveryRuntime) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AppStateInner {
                runtime: Some(runtime),
            })),
        }
    }

    /// Whether the runtime is still attached.
    pub async fn is_running(&self) -> bool {
        self.inner.read().await.runtime.is_some()
    }

    /// Run `f` against the runtime, if it has not been taken for shutdown.
    ///
    /// Handlers clone the `Arc`s they need out of the runtime here so the
    /// lock is never held across a delivery pass.
    pub async fn with_runtime<F, T>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&DeliveryRuntime) -> T,
    {
        let guard = self.inner.read().await;
        guard.runtime.as_ref().map(f)
    }

    /// Detach the runtime so the caller can shut it down.
    pub async fn take_runtime(&self) -> Option<DeliveryRuntime> {
        self.inner.write().await.runtime.take()
    }
}
