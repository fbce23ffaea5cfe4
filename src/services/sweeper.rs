//! Periodic reconciler for holds that outlived their payment window. Every
//! release uses the same version-guarded transition as the hot path, so a
//! sweep can never clobber a transition that happened concurrently: a late
//! confirm either beat us (our CAS fails, we skip) or loses (its CAS fails
//! with a conflict).

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::models::{BookingStatus, PaymentState, ServiceChargeStatus, StallStatus};
use crate::realtime::{BroadcastHub, StallEvent};
use crate::store::{ReservationStore, SettleOutcome, StoreError};

/// Marker recorded in the payment's consumed-signature set when the sweep,
/// not a gateway callback, committed the terminal transition.
const SWEEP_SIGNATURE: &str = "expired-by-sweep";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub stalls_released: usize,
    pub bookings_rejected: usize,
    pub payments_failed: usize,
}

pub struct HoldSweeper {
    store: Arc<dyn ReservationStore>,
    hub: Arc<BroadcastHub>,
    hold_window: Duration,
    payment_window: Duration,
}

impl HoldSweeper {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        hub: Arc<BroadcastHub>,
        hold_window: Duration,
        payment_window: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            hold_window,
            payment_window,
        }
    }

    /// Run the sweep loop forever. Spawned once at startup.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match self.run_once().await {
                Ok(stats) if stats != SweepStats::default() => {
                    info!(
                        released = stats.stalls_released,
                        rejected = stats.bookings_rejected,
                        failed_payments = stats.payments_failed,
                        "hold sweep completed"
                    );
                }
                Ok(_) => debug!("hold sweep found nothing to do"),
                Err(err) => warn!("hold sweep failed: {err}"),
            }
        }
    }

    pub async fn run_once(&self) -> Result<SweepStats, StoreError> {
        let mut stats = SweepStats::default();
        self.sweep_expired_holds(&mut stats).await?;
        self.sweep_stale_payments(&mut stats).await?;
        Ok(stats)
    }

    async fn sweep_expired_holds(&self, stats: &mut SweepStats) -> Result<(), StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.hold_window).unwrap_or(chrono::Duration::zero());
        let expired = self.store.reservations_older_than(cutoff).await?;

        let mut rejected = HashSet::new();
        for stall in expired {
            match self
                .store
                .try_transition(stall.id, stall.version, StallStatus::Available, None)
                .await
            {
                Ok(version) => {
                    stats.stalls_released += 1;
                    self.hub
                        .publish(stall.exhibition_id, StallEvent::released(stall.id, version));
                    if let Some(booking_id) = stall.holder {
                        if rejected.insert(booking_id) {
                            let moved = self
                                .store
                                .update_booking(
                                    booking_id,
                                    &[BookingStatus::Pending, BookingStatus::Approved],
                                    BookingStatus::Rejected,
                                    None,
                                )
                                .await?;
                            if moved {
                                stats.bookings_rejected += 1;
                            }
                        }
                    }
                }
                Err(StoreError::Conflict { .. }) => {
                    // Something transitioned the stall between our read and
                    // our CAS, most likely a late confirm. It wins.
                    debug!(stall_id = stall.id, "sweep skipped, stall moved concurrently");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    async fn sweep_stale_payments(&self, stats: &mut SweepStats) -> Result<(), StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.payment_window).unwrap_or(chrono::Duration::zero());
        let stale = self.store.pending_payments_older_than(cutoff).await?;

        for payment in stale {
            let outcome = self
                .store
                .try_settle_payment(
                    &payment.idempotency_key,
                    ServiceChargeStatus::Failed,
                    None,
                    SWEEP_SIGNATURE,
                )
                .await?;
            if outcome == SettleOutcome::Settled {
                stats.payments_failed += 1;
                // The webhook will never arrive for this payment, so the
                // booking's financial state is advanced here instead.
                if let Some(booking_id) = payment.booking_id {
                    self.store
                        .update_booking_payment_state(booking_id, PaymentState::Failed)
                        .await?;
                }
                info!(
                    idempotency_key = %payment.idempotency_key,
                    "stale pending payment marked failed"
                );
            }
        }
        Ok(())
    }
}
