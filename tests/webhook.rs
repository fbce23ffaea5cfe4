//! Reconciliation behavior for gateway callbacks: authentication, replay
//! suppression, unknown transactions and the paid-booking confirmation path.

use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};

use stall_system::error::CoreError;
use stall_system::models::{
    BookingDraft, BookingStatus, ExhibitionGate, PaymentState, ServiceChargePayment,
    ServiceChargeStatus, Stall, StallStatus,
};
use stall_system::realtime::BroadcastHub;
use stall_system::services::{BookingCoordinator, ReconciliationService};
use stall_system::store::{MemoryStore, ReservationStore};

const EXHIBITION: i64 = 7;
const WEBHOOK_USER: &str = "expo-merchant";
const WEBHOOK_PASS: &str = "hunter2";

fn auth_header() -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{WEBHOOK_USER}:{WEBHOOK_PASS}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn callback_body(key: &str, state: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "payment",
        "event": "state_changed",
        "payload": {
            "merchantTransactionId": key,
            "transactionId": "gw-881",
            "amount": 500000,
            "state": state,
            "timestamp": "2026-08-30T10:00:00Z"
        }
    }))
    .unwrap()
}

async fn setup() -> (Arc<MemoryStore>, BookingCoordinator, ReconciliationService) {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(BroadcastHub::default());
    store
        .set_exhibition_gate(&ExhibitionGate::published(EXHIBITION))
        .await
        .unwrap();
    store
        .insert_stall(&Stall::new(1, EXHIBITION, 1, "B-1", 5000.0, 12.0))
        .await
        .unwrap();
    let coordinator = BookingCoordinator::new(store.clone(), hub);
    let reconciliation = ReconciliationService::new(
        store.clone(),
        coordinator.clone(),
        WEBHOOK_USER,
        WEBHOOK_PASS,
    );
    (store, coordinator, reconciliation)
}

async fn seeded_payment(
    store: &Arc<MemoryStore>,
    coordinator: &BookingCoordinator,
) -> ServiceChargePayment {
    let booking = coordinator
        .claim(
            EXHIBITION,
            vec![1],
            BookingDraft {
                customer_name: "Vendor".into(),
                customer_email: "vendor@example.com".into(),
                customer_phone: None,
            },
        )
        .await
        .unwrap();
    coordinator.approve(booking.id).await.unwrap();

    let payment = ServiceChargePayment::new("sc-test-1", EXHIBITION, Some(booking.id), 5000.0);
    store.insert_payment(&payment).await.unwrap();
    payment
}

#[tokio::test]
async fn duplicate_delivery_settles_exactly_once() {
    let (store, coordinator, reconciliation) = setup().await;
    let payment = seeded_payment(&store, &coordinator).await;

    let body = callback_body(&payment.idempotency_key, "COMPLETED");
    let auth = auth_header();

    let first = reconciliation.reconcile(&body, Some(&auth)).await.unwrap();
    assert!(first.received);
    assert!(!first.duplicate);

    // Byte-identical redelivery is a no-op that still acknowledges.
    let second = reconciliation.reconcile(&body, Some(&auth)).await.unwrap();
    assert!(second.received);
    assert!(second.duplicate);

    let settled = store
        .payment_by_key(&payment.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, ServiceChargeStatus::Paid);
    assert_eq!(settled.gateway_transaction_id.as_deref(), Some("gw-881"));
    assert_eq!(settled.consumed_signatures.len(), 1);
}

#[tokio::test]
async fn conflicting_terminal_reports_keep_the_first() {
    let (store, coordinator, reconciliation) = setup().await;
    let payment = seeded_payment(&store, &coordinator).await;
    let auth = auth_header();

    reconciliation
        .reconcile(&callback_body(&payment.idempotency_key, "COMPLETED"), Some(&auth))
        .await
        .unwrap();

    // A later FAILED report for the same transaction cannot flip the state.
    let ack = reconciliation
        .reconcile(&callback_body(&payment.idempotency_key, "FAILED"), Some(&auth))
        .await
        .unwrap();
    assert!(ack.duplicate);

    let settled = store
        .payment_by_key(&payment.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(settled.status, ServiceChargeStatus::Paid);
}

#[tokio::test]
async fn bad_signature_changes_nothing() {
    let (store, coordinator, reconciliation) = setup().await;
    let payment = seeded_payment(&store, &coordinator).await;

    let body = callback_body(&payment.idempotency_key, "COMPLETED");
    let err = reconciliation
        .reconcile(&body, Some("deadbeef"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Auth(_)));

    let missing = reconciliation.reconcile(&body, None).await.unwrap_err();
    assert!(matches!(missing, CoreError::Auth(_)));

    let untouched = store
        .payment_by_key(&payment.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(untouched.status, ServiceChargeStatus::Pending);
    assert!(untouched.consumed_signatures.is_empty());
}

#[tokio::test]
async fn unknown_transaction_is_distinguishable() {
    let (_store, _coordinator, reconciliation) = setup().await;

    let err = reconciliation
        .reconcile(&callback_body("sc-nobody", "COMPLETED"), Some(&auth_header()))
        .await
        .unwrap_err();
    match err {
        CoreError::UnknownTransaction(key) => assert_eq!(key, "sc-nobody"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn non_terminal_state_acknowledges_without_settling() {
    let (store, coordinator, reconciliation) = setup().await;
    let payment = seeded_payment(&store, &coordinator).await;

    let ack = reconciliation
        .reconcile(
            &callback_body(&payment.idempotency_key, "PROCESSING"),
            Some(&auth_header()),
        )
        .await
        .unwrap();
    assert!(ack.received);
    assert!(ack.duplicate);

    let still_pending = store
        .payment_by_key(&payment.idempotency_key)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still_pending.status, ServiceChargeStatus::Pending);
}

#[tokio::test]
async fn paid_callback_confirms_the_approved_booking() {
    let (store, coordinator, reconciliation) = setup().await;
    let payment = seeded_payment(&store, &coordinator).await;
    let booking_id = payment.booking_id.unwrap();

    reconciliation
        .reconcile(
            &callback_body(&payment.idempotency_key, "COMPLETED"),
            Some(&auth_header()),
        )
        .await
        .unwrap();

    let booking = store.booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentState::Paid);

    let stall = &store.read_stalls(&[1]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Booked);
    assert_eq!(stall.holder, Some(booking_id));
}

#[tokio::test]
async fn failed_callback_marks_booking_unpaid_but_keeps_hold() {
    let (store, coordinator, reconciliation) = setup().await;
    let payment = seeded_payment(&store, &coordinator).await;
    let booking_id = payment.booking_id.unwrap();

    reconciliation
        .reconcile(
            &callback_body(&payment.idempotency_key, "DECLINED"),
            Some(&auth_header()),
        )
        .await
        .unwrap();

    let booking = store.booking(booking_id).await.unwrap().unwrap();
    assert_eq!(booking.status, BookingStatus::Approved);
    assert_eq!(booking.payment_status, PaymentState::Failed);

    // The hold is not released on payment failure; the sweep or an operator
    // decides what happens to the booking.
    let stall = &store.read_stalls(&[1]).await.unwrap()[0];
    assert_eq!(stall.status, StallStatus::Reserved);
}
