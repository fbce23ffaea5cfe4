use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Confirmed,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "approved" => Some(BookingStatus::Approved),
            "confirmed" => Some(BookingStatus::Confirmed),
            "rejected" => Some(BookingStatus::Rejected),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Rejected and Cancelled are soft-terminal; bookings are never deleted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Rejected | BookingStatus::Cancelled)
    }
}

/// Financial state of a booking as seen by the reconciliation handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Unpaid,
    Processing,
    Paid,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Unpaid => "unpaid",
            PaymentState::Processing => "processing",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(PaymentState::Unpaid),
            "processing" => Some(PaymentState::Processing),
            "paid" => Some(PaymentState::Paid),
            "failed" => Some(PaymentState::Failed),
            _ => None,
        }
    }
}

/// Customer-supplied part of a claim request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDraft {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
}

/// A booking is created only after every referenced stall was moved to
/// Reserved within the same claim attempt. `status == Confirmed` implies all
/// referenced stalls are Booked and held by this booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub exhibition_id: i64,
    pub stall_ids: Vec<i64>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub amount: f64,
    pub status: BookingStatus,
    pub payment_status: PaymentState,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn from_draft(exhibition_id: i64, stall_ids: Vec<i64>, amount: f64, draft: BookingDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            exhibition_id,
            stall_ids,
            customer_name: draft.customer_name,
            customer_email: draft.customer_email,
            customer_phone: draft.customer_phone,
            amount,
            status: BookingStatus::Pending,
            payment_status: PaymentState::Unpaid,
            created_at: Utc::now(),
        }
    }
}
