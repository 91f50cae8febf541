//! Availability queries, calendar views and calendar reconciliation over a
//! [`RestrictionStore`].

mod availability;
mod bookings;
mod calendar;
mod error;
mod reconcile;

pub use availability::is_free;
pub use error::{EngineError, ReconcileFailure, StaleReason};
pub use reconcile::{AppliedDelta, RoomPlan, plan_room};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::observability;
use crate::store::{RestrictionStore, StoreError};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Deadline applied to every individual store call.
    pub store_timeout: Option<Duration>,
}

pub struct Engine {
    store: Arc<dyn RestrictionStore>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn RestrictionStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<dyn RestrictionStore> {
        &self.store
    }

    /// Run one store call under the configured deadline.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let result = match self.config.store_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout),
            },
            None => fut.await,
        };
        if let Err(e) = &result {
            metrics::counter!(observability::STORE_ERRORS_TOTAL, "op" => op).increment(1);
            warn!("store {op} failed: {e}");
        }
        result
    }
}
