//! Webhook reconciliation: verifies callback authenticity, then performs one
//! idempotent terminal transition per payment. Duplicate and replayed
//! deliveries are cheap no-ops that still acknowledge success, so the
//! gateway stops retrying. This path never goes through the settlement
//! queue; inbound callbacks must always be accepted promptly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{BookingStatus, PaymentState, ServiceChargeStatus};
use crate::services::coordinator::BookingCoordinator;
use crate::store::{ReservationStore, SettleOutcome};

/// Body of a gateway callback. Only the idempotency/signature contract is
/// fixed; providers differ in the rest, so unknown fields are ignored.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub event: Option<String>,
    pub payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(rename = "merchantTransactionId", alias = "merchantOrderId")]
    pub merchant_transaction_id: String,
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    pub amount: Option<i64>,
    pub state: String,
    #[serde(default, rename = "paymentDetails")]
    pub payment_details: Vec<serde_json::Value>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    /// True when the callback changed nothing (duplicate, replay, or a
    /// non-terminal state report).
    pub duplicate: bool,
}

pub struct ReconciliationService {
    store: Arc<dyn ReservationStore>,
    coordinator: BookingCoordinator,
    /// Hex SHA-256 of `username:password`, precomputed at startup.
    expected_auth: String,
}

fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        coordinator: BookingCoordinator,
        webhook_username: &str,
        webhook_password: &str,
    ) -> Self {
        Self {
            store,
            coordinator,
            expected_auth: sha256_hex(format!("{webhook_username}:{webhook_password}").as_bytes()),
        }
    }

    /// Apply one callback. The order of checks matters:
    /// signature first (nothing is touched on mismatch), then lookup, then
    /// the replay set, then the terminal-status short circuit, and only then
    /// the single atomic settle.
    pub async fn reconcile(
        &self,
        raw_body: &[u8],
        authorization: Option<&str>,
    ) -> Result<WebhookAck, CoreError> {
        let provided = authorization
            .ok_or_else(|| CoreError::Auth("missing webhook authorization".into()))?;
        if !provided.trim().eq_ignore_ascii_case(&self.expected_auth) {
            // Logged for security review; distinct from unknown-transaction.
            warn!("webhook signature mismatch, rejecting without state changes");
            return Err(CoreError::Auth("invalid webhook signature".into()));
        }

        let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
            .map_err(|err| CoreError::Validation(format!("unparseable webhook body: {err}")))?;
        let key = envelope.payload.merchant_transaction_id.clone();

        let payment = self
            .store
            .payment_by_key(&key)
            .await?
            .ok_or_else(|| {
                // May be a race between order creation and callback delivery;
                // the gateway will retry a bounded number of times.
                warn!(idempotency_key = %key, "webhook for unknown transaction");
                CoreError::UnknownTransaction(key.clone())
            })?;

        // Replay protection: two different payloads may claim the same
        // terminal state through different signatures, so the consumed set is
        // checked even though the terminal-status check below catches most
        // duplicates.
        let signature = sha256_hex(raw_body);
        if self.store.signature_consumed(&key, &signature).await? {
            info!(idempotency_key = %key, "replayed webhook, acknowledging no-op");
            return Ok(WebhookAck { received: true, duplicate: true });
        }

        if payment.status.is_terminal() {
            info!(idempotency_key = %key, "payment already terminal, acknowledging no-op");
            return Ok(WebhookAck { received: true, duplicate: true });
        }

        let terminal = match envelope.payload.state.to_ascii_uppercase().as_str() {
            "COMPLETED" | "CONFIRMED" | "PAID" | "SUCCESS" => ServiceChargeStatus::Paid,
            "FAILED" | "DECLINED" | "CANCELLED" | "EXPIRED" | "TIMED_OUT" => {
                ServiceChargeStatus::Failed
            }
            // Progress reports carry no terminal state; acknowledge and wait.
            other => {
                info!(idempotency_key = %key, state = other, "non-terminal webhook state");
                return Ok(WebhookAck { received: true, duplicate: true });
            }
        };

        let outcome = self
            .store
            .try_settle_payment(
                &key,
                terminal,
                envelope.payload.transaction_id.as_deref(),
                &signature,
            )
            .await?;
        match outcome {
            SettleOutcome::Settled => {}
            SettleOutcome::AlreadyTerminal => {
                // Lost a settle race with a concurrent delivery; same answer.
                return Ok(WebhookAck { received: true, duplicate: true });
            }
            SettleOutcome::Missing => return Err(CoreError::UnknownTransaction(key)),
        }

        info!(
            idempotency_key = %key,
            status = terminal.as_str(),
            "payment settled"
        );

        if let Some(booking_id) = payment.booking_id {
            self.advance_booking(booking_id, terminal).await?;
        }

        Ok(WebhookAck { received: true, duplicate: false })
    }

    /// Move the booking's financial state along with the payment and, when
    /// this settled the last outstanding charge on an approved booking,
    /// advance it to Confirmed (stalls go Reserved -> Booked).
    async fn advance_booking(
        &self,
        booking_id: Uuid,
        terminal: ServiceChargeStatus,
    ) -> Result<(), CoreError> {
        let payment_state = match terminal {
            ServiceChargeStatus::Paid => PaymentState::Paid,
            _ => PaymentState::Failed,
        };
        self.store
            .update_booking_payment_state(booking_id, payment_state)
            .await?;

        if terminal != ServiceChargeStatus::Paid {
            return Ok(());
        }
        let Some(booking) = self.store.booking(booking_id).await? else {
            return Ok(());
        };
        if booking.status == BookingStatus::Approved {
            match self.coordinator.confirm(booking_id).await {
                Ok(_) => {}
                Err(CoreError::Conflict { stall_ids }) => {
                    // A hold sweep won the race for some stall; the payment
                    // stays settled and operators resolve the booking.
                    warn!(
                        booking_id = %booking_id,
                        ?stall_ids,
                        "paid booking could not be confirmed, stalls were released"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }
}
