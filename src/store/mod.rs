//! Reservation Store: the single authoritative home of stall, booking and
//! payment records. Every mutation goes through a versioned compare-and-swap;
//! no implementation may hold a lock spanning multiple stalls or multiple
//! calls. Cross-stall atomicity belongs to the coordinator, not the store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, ExhibitionGate, PaymentState, ServiceChargePayment,
    ServiceChargeStatus, Stall, StallStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The caller's expected version lost a race; `current_version` is what
    /// the record holds now.
    #[error("version conflict, current version is {current_version}")]
    Conflict { current_version: i64 },

    #[error("record not found")]
    NotFound,

    #[error("duplicate key")]
    Duplicate,

    #[error("corrupt record: {0}")]
    Decode(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Outcome of an attempted terminal settlement on a payment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This call committed the one terminal transition.
    Settled,
    /// A terminal transition was already committed earlier; nothing changed.
    AlreadyTerminal,
    /// No payment carries the idempotency key.
    Missing,
}

#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    // --- stalls ---

    async fn read_stalls(&self, stall_ids: &[i64]) -> Result<Vec<Stall>, StoreError>;

    async fn list_stalls(&self, exhibition_id: i64) -> Result<Vec<Stall>, StoreError>;

    /// Created at exhibition-layout design time; always starts Available.
    async fn insert_stall(&self, stall: &Stall) -> Result<(), StoreError>;

    /// Atomically move one stall to `new_status` iff its version still equals
    /// `expected_version`. Bumps the version and returns the new value.
    /// `holder` replaces the current holder (None clears it). `reserved_at`
    /// is set when entering Reserved and cleared otherwise.
    async fn try_transition(
        &self,
        stall_id: i64,
        expected_version: i64,
        new_status: StallStatus,
        holder: Option<Uuid>,
    ) -> Result<i64, StoreError>;

    // --- bookings ---

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError>;

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Conditional status update: applies only while the booking is in one of
    /// `expected`. Returns false when the precondition no longer holds.
    async fn update_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        status: BookingStatus,
        payment_status: Option<PaymentState>,
    ) -> Result<bool, StoreError>;

    /// Payment-state-only update used by the reconciliation handler.
    async fn update_booking_payment_state(
        &self,
        id: Uuid,
        payment_status: PaymentState,
    ) -> Result<bool, StoreError>;

    // --- service charge payments ---

    async fn insert_payment(&self, payment: &ServiceChargePayment) -> Result<(), StoreError>;

    async fn payment_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ServiceChargePayment>, StoreError>;

    /// The one atomic terminal transition per idempotency key. Moves a
    /// Pending/Processing payment to `terminal`, records the payload
    /// signature and bumps the row version. Payments already terminal are
    /// left untouched and reported as such.
    async fn try_settle_payment(
        &self,
        idempotency_key: &str,
        terminal: ServiceChargeStatus,
        gateway_transaction_id: Option<&str>,
        signature: &str,
    ) -> Result<SettleOutcome, StoreError>;

    /// Replay-protection probe, checked before any settlement attempt.
    async fn signature_consumed(
        &self,
        idempotency_key: &str,
        signature: &str,
    ) -> Result<bool, StoreError>;

    // --- exhibition gating (read model) ---

    async fn exhibition_gate(&self, exhibition_id: i64)
        -> Result<Option<ExhibitionGate>, StoreError>;

    async fn set_exhibition_gate(&self, gate: &ExhibitionGate) -> Result<(), StoreError>;

    // --- sweep reads ---

    /// Stalls sitting in Reserved since before `cutoff`.
    async fn reservations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Stall>, StoreError>;

    /// Payments still Pending that were created before `cutoff`.
    async fn pending_payments_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ServiceChargePayment>, StoreError>;
}
