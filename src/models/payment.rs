use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceChargeStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

impl ServiceChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceChargeStatus::Pending => "pending",
            ServiceChargeStatus::Processing => "processing",
            ServiceChargeStatus::Paid => "paid",
            ServiceChargeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ServiceChargeStatus::Pending),
            "processing" => Some(ServiceChargeStatus::Processing),
            "paid" => Some(ServiceChargeStatus::Paid),
            "failed" => Some(ServiceChargeStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceChargeStatus::Paid | ServiceChargeStatus::Failed)
    }
}

/// One-off vendor payment tracked against a gateway transaction.
///
/// Exactly one terminal transition (Paid or Failed) may ever be committed per
/// `idempotency_key`. `consumed_signatures` records the payload digests
/// already applied so replayed callbacks stay cheap no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceChargePayment {
    pub id: Uuid,
    /// The gateway's merchant-transaction identifier.
    pub idempotency_key: String,
    pub exhibition_id: i64,
    pub booking_id: Option<Uuid>,
    pub amount: f64,
    /// Null until the first callback names it.
    pub gateway_transaction_id: Option<String>,
    pub status: ServiceChargeStatus,
    pub version: i64,
    pub consumed_signatures: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ServiceChargePayment {
    pub fn new(
        idempotency_key: impl Into<String>,
        exhibition_id: i64,
        booking_id: Option<Uuid>,
        amount: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            idempotency_key: idempotency_key.into(),
            exhibition_id,
            booking_id,
            amount,
            gateway_transaction_id: None,
            status: ServiceChargeStatus::Pending,
            version: 1,
            consumed_signatures: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
