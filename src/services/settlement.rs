//! Bounded admission gate for outbound payment-gateway work. A burst of
//! client traffic must not exhaust gateway connection limits, so at most
//! `max_concurrent` financial operations may be in flight and each one is
//! evicted at its deadline instead of blocking the queue. Inbound webhook
//! reconciliation never goes through here: gateways retry aggressively on
//! slow acknowledgements, which would only create more duplicate deliveries.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::CoreError;

pub struct SettlementQueue {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
}

impl SettlementQueue {
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
        }
    }

    /// Run one outbound operation under admission control.
    ///
    /// A full queue rejects immediately (`QueueFull`) rather than queueing
    /// intent; the submission guard on the client side owns the retry story.
    /// Operations past their deadline are dropped and reported as `Timeout`.
    pub async fn submit<F, T>(&self, operation: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let _permit = self.permits.try_acquire().map_err(|_| {
            warn!("settlement queue is full, rejecting operation");
            CoreError::QueueFull
        })?;

        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "settlement operation evicted at deadline");
                Err(CoreError::Timeout)
            }
        }
    }

    /// Operations currently holding a permit, for monitoring.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.max_concurrent
    }
}
