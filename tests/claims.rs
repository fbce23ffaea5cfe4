//! End-to-end claim behavior against the in-memory store: mutual exclusion
//! under contention, all-or-nothing multi-stall claims, exhibition gating and
//! expiry of stale holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use stall_system::error::CoreError;
use stall_system::models::{
    Booking, BookingDraft, BookingStatus, ExhibitionGate, PaymentState, ServiceChargePayment,
    ServiceChargeStatus, Stall, StallStatus,
};
use stall_system::realtime::{BroadcastHub, StallEvent};
use stall_system::services::{BookingCoordinator, HoldSweeper};
use stall_system::store::{MemoryStore, ReservationStore, SettleOutcome, StoreError};

const EXHIBITION: i64 = 42;

fn draft(n: usize) -> BookingDraft {
    BookingDraft {
        customer_name: format!("Vendor {n}"),
        customer_email: format!("vendor{n}@example.com"),
        customer_phone: None,
    }
}

async fn setup(stall_ids: &[i64]) -> (Arc<MemoryStore>, Arc<BroadcastHub>, BookingCoordinator) {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::default());
    store
        .set_exhibition_gate(&ExhibitionGate::published(EXHIBITION))
        .await
        .unwrap();
    for &id in stall_ids {
        store
            .insert_stall(&Stall::new(id, EXHIBITION, 1, format!("A-{id}"), 5000.0, 9.0))
            .await
            .unwrap();
    }
    let coordinator = BookingCoordinator::new(store.clone(), hub.clone());
    (store, hub, coordinator)
}

#[tokio::test]
async fn concurrent_claims_grant_exactly_one_winner() {
    let (store, _hub, coordinator) = setup(&[1]).await;

    let mut handles = Vec::new();
    for n in 0..16 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.claim(EXHIBITION, vec![1], draft(n)).await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(CoreError::Conflict { stall_ids }) => {
                assert_eq!(stall_ids, vec![1]);
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 15);

    let stall = &store.read_stalls(&[1]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Reserved);
    assert!(stall.holder.is_some());
}

#[tokio::test]
async fn multi_stall_claim_is_all_or_nothing() {
    let (store, _hub, coordinator) = setup(&[10, 11]).await;

    // Someone else holds stall 11 already.
    coordinator
        .claim(EXHIBITION, vec![11], draft(0))
        .await
        .unwrap();

    let before = store.read_stalls(&[10]).await.unwrap()[0].clone();
    let err = coordinator
        .claim(EXHIBITION, vec![10, 11], draft(1))
        .await
        .unwrap_err();

    // Only the contested stall is named; the available one is untouched.
    match err {
        CoreError::Conflict { stall_ids } => assert_eq!(stall_ids, vec![11]),
        other => panic!("unexpected error {other:?}"),
    }
    let after = store.read_stalls(&[10]).await.unwrap()[0].clone();
    assert_eq!(after.status, StallStatus::Available);
    assert_eq!(after.version, before.version);
    assert!(after.holder.is_none());
}

#[tokio::test]
async fn unpublished_exhibition_rejects_claims() {
    let (store, _hub, coordinator) = setup(&[5]).await;

    store
        .set_exhibition_gate(&ExhibitionGate {
            exhibition_id: EXHIBITION,
            status: "published".into(),
            is_active: false,
        })
        .await
        .unwrap();

    let err = coordinator
        .claim(EXHIBITION, vec![5], draft(0))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ExhibitionUnavailable));

    let stall = &store.read_stalls(&[5]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Available);
    assert_eq!(stall.version, 1);
}

#[tokio::test]
async fn duplicate_stall_ids_collapse_to_one_claim() {
    let (store, _hub, coordinator) = setup(&[3]).await;

    let booking = coordinator
        .claim(EXHIBITION, vec![3, 3, 3], draft(0))
        .await
        .unwrap();
    assert_eq!(booking.stall_ids, vec![3]);
    assert_eq!(booking.amount, 5000.0);

    let stall = &store.read_stalls(&[3]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Reserved);
    assert_eq!(stall.version, 2);
}

#[tokio::test]
async fn sweep_releases_expired_hold_and_stale_confirm_loses() {
    let (store, hub, coordinator) = setup(&[20]).await;

    let booking = coordinator
        .claim(EXHIBITION, vec![20], draft(0))
        .await
        .unwrap();
    let held = store.read_stalls(&[20]).await.unwrap()[0].clone();
    assert_eq!(held.status, StallStatus::Reserved);

    // Zero hold window makes every current reservation expired.
    let sweeper = HoldSweeper::new(
        store.clone(),
        hub.clone(),
        Duration::ZERO,
        Duration::from_secs(900),
    );
    let stats = sweeper.run_once().await.unwrap();
    assert_eq!(stats.stalls_released, 1);
    assert_eq!(stats.bookings_rejected, 1);

    let released = store.read_stalls(&[20]).await.unwrap()[0].clone();
    assert_eq!(released.status, StallStatus::Available);
    assert!(released.version > held.version);
    assert!(released.holder.is_none());

    // A confirm arriving after the sweep must lose, not resurrect the hold.
    let err = coordinator.confirm(booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict { .. } | CoreError::Validation(_)));
    let stall = &store.read_stalls(&[20]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Available);
}

#[tokio::test]
async fn sweep_fails_stale_payment_and_its_booking() {
    let (store, hub, coordinator) = setup(&[40]).await;

    let booking = coordinator
        .claim(EXHIBITION, vec![40], draft(0))
        .await
        .unwrap();
    coordinator.approve(booking.id).await.unwrap();

    let payment = ServiceChargePayment::new("sc-stale", EXHIBITION, Some(booking.id), 5000.0);
    store.insert_payment(&payment).await.unwrap();

    // Zero payment window: every pending payment is already stale. The hold
    // window stays wide so only the payment sweep acts.
    let sweeper = HoldSweeper::new(
        store.clone(),
        hub.clone(),
        Duration::from_secs(900),
        Duration::ZERO,
    );
    let stats = sweeper.run_once().await.unwrap();
    assert_eq!(stats.payments_failed, 1);
    assert_eq!(stats.stalls_released, 0);

    let failed = store.payment_by_key("sc-stale").await.unwrap().unwrap();
    assert_eq!(failed.status, ServiceChargeStatus::Failed);

    // The booking's financial state follows; no webhook will arrive anymore.
    let booking = store.booking(booking.id).await.unwrap().unwrap();
    assert_eq!(booking.payment_status, PaymentState::Failed);
}

/// Store wrapper that cancels the booking just before a Confirmed row update
/// is applied, reproducing a terminate that wins the booking row after the
/// confirm has already read it.
struct TerminateRaceStore {
    inner: MemoryStore,
    armed: AtomicBool,
}

impl TerminateRaceStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReservationStore for TerminateRaceStore {
    async fn read_stalls(&self, stall_ids: &[i64]) -> Result<Vec<Stall>, StoreError> {
        self.inner.read_stalls(stall_ids).await
    }

    async fn list_stalls(&self, exhibition_id: i64) -> Result<Vec<Stall>, StoreError> {
        self.inner.list_stalls(exhibition_id).await
    }

    async fn insert_stall(&self, stall: &Stall) -> Result<(), StoreError> {
        self.inner.insert_stall(stall).await
    }

    async fn try_transition(
        &self,
        stall_id: i64,
        expected_version: i64,
        new_status: StallStatus,
        holder: Option<Uuid>,
    ) -> Result<i64, StoreError> {
        self.inner
            .try_transition(stall_id, expected_version, new_status, holder)
            .await
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        self.inner.insert_booking(booking).await
    }

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        self.inner.booking(id).await
    }

    async fn update_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        status: BookingStatus,
        payment_status: Option<PaymentState>,
    ) -> Result<bool, StoreError> {
        if status == BookingStatus::Confirmed && self.armed.swap(false, Ordering::SeqCst) {
            // The racing cancel takes the booking row first; its stall
            // release has already lost to the confirm's Booked transition.
            self.inner
                .update_booking(id, &[BookingStatus::Approved], BookingStatus::Cancelled, None)
                .await?;
        }
        self.inner
            .update_booking(id, expected, status, payment_status)
            .await
    }

    async fn update_booking_payment_state(
        &self,
        id: Uuid,
        payment_status: PaymentState,
    ) -> Result<bool, StoreError> {
        self.inner.update_booking_payment_state(id, payment_status).await
    }

    async fn insert_payment(&self, payment: &ServiceChargePayment) -> Result<(), StoreError> {
        self.inner.insert_payment(payment).await
    }

    async fn payment_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ServiceChargePayment>, StoreError> {
        self.inner.payment_by_key(idempotency_key).await
    }

    async fn try_settle_payment(
        &self,
        idempotency_key: &str,
        terminal: ServiceChargeStatus,
        gateway_transaction_id: Option<&str>,
        signature: &str,
    ) -> Result<SettleOutcome, StoreError> {
        self.inner
            .try_settle_payment(idempotency_key, terminal, gateway_transaction_id, signature)
            .await
    }

    async fn signature_consumed(
        &self,
        idempotency_key: &str,
        signature: &str,
    ) -> Result<bool, StoreError> {
        self.inner.signature_consumed(idempotency_key, signature).await
    }

    async fn exhibition_gate(
        &self,
        exhibition_id: i64,
    ) -> Result<Option<ExhibitionGate>, StoreError> {
        self.inner.exhibition_gate(exhibition_id).await
    }

    async fn set_exhibition_gate(&self, gate: &ExhibitionGate) -> Result<(), StoreError> {
        self.inner.set_exhibition_gate(gate).await
    }

    async fn reservations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Stall>, StoreError> {
        self.inner.reservations_older_than(cutoff).await
    }

    async fn pending_payments_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ServiceChargePayment>, StoreError> {
        self.inner.pending_payments_older_than(cutoff).await
    }
}

#[tokio::test]
async fn confirm_losing_the_booking_row_releases_its_stalls() {
    let store = Arc::new(TerminateRaceStore::new());
    let hub = Arc::new(BroadcastHub::default());
    store
        .set_exhibition_gate(&ExhibitionGate::published(EXHIBITION))
        .await
        .unwrap();
    store
        .insert_stall(&Stall::new(50, EXHIBITION, 1, "C-50", 5000.0, 9.0))
        .await
        .unwrap();
    let coordinator = BookingCoordinator::new(store.clone(), hub);

    let booking = coordinator
        .claim(EXHIBITION, vec![50], draft(0))
        .await
        .unwrap();
    coordinator.approve(booking.id).await.unwrap();

    store.arm();
    let err = coordinator.confirm(booking.id).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    // The cancel owns the booking; the stall must not stay Booked under it.
    let cancelled = store.booking(booking.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    let stall = &store.read_stalls(&[50]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Available);
    assert!(stall.holder.is_none());
}

#[tokio::test]
async fn broadcast_events_carry_post_transition_versions() {
    let (_store, hub, coordinator) = setup(&[30]).await;
    let mut sub = hub.join(EXHIBITION);

    let booking = coordinator
        .claim(EXHIBITION, vec![30], draft(0))
        .await
        .unwrap();

    match sub.recv().await.unwrap() {
        StallEvent::StallBooked {
            stall_id,
            booking_id,
            status,
            version,
            ..
        } => {
            assert_eq!(stall_id, 30);
            assert_eq!(booking_id, booking.id);
            assert_eq!(status, StallStatus::Reserved);
            assert_eq!(version, 2);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Cancellation releases the stall and announces the next version.
    coordinator.cancel(booking.id).await.unwrap();
    match sub.recv().await.unwrap() {
        StallEvent::StallReleased { stall_id, version, .. } => {
            assert_eq!(stall_id, 30);
            assert_eq!(version, 3);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
