//! In-memory store backing the test suite and database-less deployments.
//! A single mutex guards the maps; no await happens while it is held, so
//! every trait call is one atomic step exactly like a row-level CAS.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, ExhibitionGate, PaymentState, ServiceChargePayment,
    ServiceChargeStatus, Stall, StallStatus,
};

use super::{ReservationStore, SettleOutcome, StoreError};

#[derive(Default)]
struct Inner {
    stalls: HashMap<i64, Stall>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<String, ServiceChargePayment>,
    gates: HashMap<i64, ExhibitionGate>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn read_stalls(&self, stall_ids: &[i64]) -> Result<Vec<Stall>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(stall_ids
            .iter()
            .filter_map(|id| inner.stalls.get(id).cloned())
            .collect())
    }

    async fn list_stalls(&self, exhibition_id: i64) -> Result<Vec<Stall>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut stalls: Vec<Stall> = inner
            .stalls
            .values()
            .filter(|s| s.exhibition_id == exhibition_id)
            .cloned()
            .collect();
        stalls.sort_by_key(|s| s.id);
        Ok(stalls)
    }

    async fn insert_stall(&self, stall: &Stall) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stalls.contains_key(&stall.id) {
            return Err(StoreError::Duplicate);
        }
        inner.stalls.insert(stall.id, stall.clone());
        Ok(())
    }

    async fn try_transition(
        &self,
        stall_id: i64,
        expected_version: i64,
        new_status: StallStatus,
        holder: Option<Uuid>,
    ) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let stall = inner.stalls.get_mut(&stall_id).ok_or(StoreError::NotFound)?;
        if stall.version != expected_version {
            return Err(StoreError::Conflict {
                current_version: stall.version,
            });
        }
        stall.status = new_status;
        stall.holder = holder;
        stall.reserved_at = if new_status == StallStatus::Reserved {
            Some(Utc::now())
        } else {
            None
        };
        stall.version += 1;
        Ok(stall.version)
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.bookings.contains_key(&booking.id) {
            return Err(StoreError::Duplicate);
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.bookings.get(&id).cloned())
    }

    async fn update_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        status: BookingStatus,
        payment_status: Option<PaymentState>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let booking = inner.bookings.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !expected.contains(&booking.status) {
            return Ok(false);
        }
        booking.status = status;
        if let Some(ps) = payment_status {
            booking.payment_status = ps;
        }
        Ok(true)
    }

    async fn update_booking_payment_state(
        &self,
        id: Uuid,
        payment_status: PaymentState,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.bookings.get_mut(&id) {
            Some(booking) => {
                booking.payment_status = payment_status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_payment(&self, payment: &ServiceChargePayment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.payments.contains_key(&payment.idempotency_key) {
            return Err(StoreError::Duplicate);
        }
        inner
            .payments
            .insert(payment.idempotency_key.clone(), payment.clone());
        Ok(())
    }

    async fn payment_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ServiceChargePayment>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.payments.get(idempotency_key).cloned())
    }

    async fn try_settle_payment(
        &self,
        idempotency_key: &str,
        terminal: ServiceChargeStatus,
        gateway_transaction_id: Option<&str>,
        signature: &str,
    ) -> Result<SettleOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let payment = match inner.payments.get_mut(idempotency_key) {
            Some(p) => p,
            None => return Ok(SettleOutcome::Missing),
        };
        if payment.status.is_terminal() {
            return Ok(SettleOutcome::AlreadyTerminal);
        }
        payment.status = terminal;
        if let Some(txn) = gateway_transaction_id {
            payment.gateway_transaction_id = Some(txn.to_string());
        }
        payment.consumed_signatures.push(signature.to_string());
        payment.version += 1;
        Ok(SettleOutcome::Settled)
    }

    async fn signature_consumed(
        &self,
        idempotency_key: &str,
        signature: &str,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .get(idempotency_key)
            .map(|p| p.consumed_signatures.iter().any(|s| s == signature))
            .unwrap_or(false))
    }

    async fn exhibition_gate(
        &self,
        exhibition_id: i64,
    ) -> Result<Option<ExhibitionGate>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.gates.get(&exhibition_id).cloned())
    }

    async fn set_exhibition_gate(&self, gate: &ExhibitionGate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.gates.insert(gate.exhibition_id, gate.clone());
        Ok(())
    }

    async fn reservations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Stall>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .stalls
            .values()
            .filter(|s| {
                s.status == StallStatus::Reserved
                    && s.reserved_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn pending_payments_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ServiceChargePayment>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .payments
            .values()
            .filter(|p| p.status == ServiceChargeStatus::Pending && p.created_at < cutoff)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn stall(id: i64) -> Stall {
        Stall::new(id, 1, 1, format!("S-{id}"), 1000.0, 9.0)
    }

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let store = MemoryStore::new();
        store.insert_stall(&stall(1)).await.unwrap();

        let v2 = store
            .try_transition(1, 1, StallStatus::Reserved, Some(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(v2, 2);

        // A second writer still holding version 1 must lose.
        let err = store
            .try_transition(1, 1, StallStatus::Reserved, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        match err {
            StoreError::Conflict { current_version } => assert_eq!(current_version, 2),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transition_clears_reserved_at_outside_reserved() {
        let store = MemoryStore::new();
        store.insert_stall(&stall(7)).await.unwrap();
        let holder = Uuid::new_v4();

        store
            .try_transition(7, 1, StallStatus::Reserved, Some(holder))
            .await
            .unwrap();
        let reserved = store.read_stalls(&[7]).await.unwrap().remove(0);
        assert!(reserved.reserved_at.is_some());

        store
            .try_transition(7, 2, StallStatus::Booked, Some(holder))
            .await
            .unwrap();
        let booked = store.read_stalls(&[7]).await.unwrap().remove(0);
        assert!(booked.reserved_at.is_none());
        assert_eq!(booked.holder, Some(holder));
    }

    #[tokio::test]
    async fn settle_is_terminal_exactly_once() {
        let store = MemoryStore::new();
        let payment = ServiceChargePayment::new("txn-1", 1, None, 500.0);
        store.insert_payment(&payment).await.unwrap();

        let first = store
            .try_settle_payment("txn-1", ServiceChargeStatus::Paid, Some("gw-9"), "sig-a")
            .await
            .unwrap();
        assert_eq!(first, SettleOutcome::Settled);

        let second = store
            .try_settle_payment("txn-1", ServiceChargeStatus::Failed, None, "sig-b")
            .await
            .unwrap();
        assert_eq!(second, SettleOutcome::AlreadyTerminal);

        let row = store.payment_by_key("txn-1").await.unwrap().unwrap();
        assert_eq!(row.status, ServiceChargeStatus::Paid);
        assert_eq!(row.gateway_transaction_id.as_deref(), Some("gw-9"));
        assert!(store.signature_consumed("txn-1", "sig-a").await.unwrap());
        assert!(!store.signature_consumed("txn-1", "sig-b").await.unwrap());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Any interleaving of transition attempts, with correct or stale
            // versions, leaves the version strictly increasing.
            #[test]
            fn version_never_regresses(attempts in proptest::collection::vec(0i64..6, 1..40)) {
                let store = Arc::new(MemoryStore::new());
                futures::executor::block_on(async {
                    store.insert_stall(&stall(1)).await.unwrap();
                    let mut last_seen = 1i64;
                    for (i, guess) in attempts.iter().enumerate() {
                        let status = if i % 2 == 0 { StallStatus::Reserved } else { StallStatus::Available };
                        let expected = last_seen + guess - 3;
                        let _ = store.try_transition(1, expected, status, None).await;
                        let current = store.read_stalls(&[1]).await.unwrap().remove(0).version;
                        assert!(current >= last_seen, "version regressed: {current} < {last_seen}");
                        last_seen = current;
                    }
                });
            }
        }
    }
}
