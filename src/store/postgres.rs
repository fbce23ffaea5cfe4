//! Postgres-backed store. The compare-and-swap is a conditional UPDATE with
//! `WHERE version = $n`; row versioning gives the same atomicity contract as
//! the in-memory variant without any cross-request lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    Booking, BookingStatus, ExhibitionGate, PaymentState, ServiceChargePayment,
    ServiceChargeStatus, Stall, StallStatus,
};

use super::{ReservationStore, SettleOutcome, StoreError};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type StallRow = (
    i64,
    i64,
    i64,
    String,
    f64,
    f64,
    String,
    i64,
    Option<Uuid>,
    Option<DateTime<Utc>>,
);

const STALL_COLUMNS: &str =
    "id, exhibition_id, hall_id, stall_number, price, area_sqm, status, version, holder, reserved_at";

fn stall_from_row(row: StallRow) -> Result<Stall, StoreError> {
    let (id, exhibition_id, hall_id, stall_number, price, area_sqm, status, version, holder, reserved_at) =
        row;
    Ok(Stall {
        id,
        exhibition_id,
        hall_id,
        stall_number,
        price,
        area_sqm,
        status: StallStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("stall {id} has status '{status}'")))?,
        version,
        holder,
        reserved_at,
    })
}

type PaymentRow = (
    Uuid,
    String,
    i64,
    Option<Uuid>,
    f64,
    Option<String>,
    String,
    i64,
    Vec<String>,
    DateTime<Utc>,
);

const PAYMENT_COLUMNS: &str = "id, idempotency_key, exhibition_id, booking_id, amount, \
     gateway_transaction_id, status, version, consumed_signatures, created_at";

fn payment_from_row(row: PaymentRow) -> Result<ServiceChargePayment, StoreError> {
    let (
        id,
        idempotency_key,
        exhibition_id,
        booking_id,
        amount,
        gateway_transaction_id,
        status,
        version,
        consumed_signatures,
        created_at,
    ) = row;
    Ok(ServiceChargePayment {
        id,
        status: ServiceChargeStatus::parse(&status)
            .ok_or_else(|| StoreError::Decode(format!("payment {id} has status '{status}'")))?,
        idempotency_key,
        exhibition_id,
        booking_id,
        amount,
        gateway_transaction_id,
        version,
        consumed_signatures,
        created_at,
    })
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn read_stalls(&self, stall_ids: &[i64]) -> Result<Vec<Stall>, StoreError> {
        let rows: Vec<StallRow> = sqlx::query_as(&format!(
            "SELECT {STALL_COLUMNS} FROM stalls WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(stall_ids.to_vec())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stall_from_row).collect()
    }

    async fn list_stalls(&self, exhibition_id: i64) -> Result<Vec<Stall>, StoreError> {
        let rows: Vec<StallRow> = sqlx::query_as(&format!(
            "SELECT {STALL_COLUMNS} FROM stalls WHERE exhibition_id = $1 ORDER BY id"
        ))
        .bind(exhibition_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stall_from_row).collect()
    }

    async fn insert_stall(&self, stall: &Stall) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stalls (id, exhibition_id, hall_id, stall_number, price, area_sqm, status, version)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(stall.id)
        .bind(stall.exhibition_id)
        .bind(stall.hall_id)
        .bind(&stall.stall_number)
        .bind(stall.price)
        .bind(stall.area_sqm)
        .bind(stall.status.as_str())
        .bind(stall.version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn try_transition(
        &self,
        stall_id: i64,
        expected_version: i64,
        new_status: StallStatus,
        holder: Option<Uuid>,
    ) -> Result<i64, StoreError> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE stalls
             SET status = $3,
                 holder = $4,
                 reserved_at = CASE WHEN $3 = 'reserved' THEN NOW() ELSE NULL END,
                 version = version + 1
             WHERE id = $1 AND version = $2
             RETURNING version",
        )
        .bind(stall_id)
        .bind(expected_version)
        .bind(new_status.as_str())
        .bind(holder)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(version) => Ok(version),
            None => {
                let current: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM stalls WHERE id = $1")
                        .bind(stall_id)
                        .fetch_optional(&self.pool)
                        .await?;
                match current {
                    Some(current_version) => Err(StoreError::Conflict { current_version }),
                    None => Err(StoreError::NotFound),
                }
            }
        }
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO bookings (id, exhibition_id, stall_ids, customer_name, customer_email,
                                   customer_phone, amount, status, payment_status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(booking.id)
        .bind(booking.exhibition_id)
        .bind(&booking.stall_ids)
        .bind(&booking.customer_name)
        .bind(&booking.customer_email)
        .bind(&booking.customer_phone)
        .bind(booking.amount)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        let row = sqlx::query(
            "SELECT id, exhibition_id, stall_ids, customer_name, customer_email, customer_phone,
                    amount, status, payment_status, created_at
             FROM bookings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let status: String = row.get("status");
        let payment_status: String = row.get("payment_status");
        Ok(Some(Booking {
            id: row.get("id"),
            exhibition_id: row.get("exhibition_id"),
            stall_ids: row.get("stall_ids"),
            customer_name: row.get("customer_name"),
            customer_email: row.get("customer_email"),
            customer_phone: row.get("customer_phone"),
            amount: row.get("amount"),
            status: BookingStatus::parse(&status)
                .ok_or_else(|| StoreError::Decode(format!("booking {id} has status '{status}'")))?,
            payment_status: PaymentState::parse(&payment_status).ok_or_else(|| {
                StoreError::Decode(format!("booking {id} has payment_status '{payment_status}'"))
            })?,
            created_at: row.get("created_at"),
        }))
    }

    async fn update_booking(
        &self,
        id: Uuid,
        expected: &[BookingStatus],
        status: BookingStatus,
        payment_status: Option<PaymentState>,
    ) -> Result<bool, StoreError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            "UPDATE bookings
             SET status = $3, payment_status = COALESCE($4, payment_status)
             WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(&expected)
        .bind(status.as_str())
        .bind(payment_status.map(|p| p.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_booking_payment_state(
        &self,
        id: Uuid,
        payment_status: PaymentState,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE bookings SET payment_status = $2 WHERE id = $1")
            .bind(id)
            .bind(payment_status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_payment(&self, payment: &ServiceChargePayment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO service_charge_payments
                 (id, idempotency_key, exhibition_id, booking_id, amount,
                  gateway_transaction_id, status, version, consumed_signatures, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(payment.id)
        .bind(&payment.idempotency_key)
        .bind(payment.exhibition_id)
        .bind(payment.booking_id)
        .bind(payment.amount)
        .bind(&payment.gateway_transaction_id)
        .bind(payment.status.as_str())
        .bind(payment.version)
        .bind(&payment.consumed_signatures)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn payment_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<ServiceChargePayment>, StoreError> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM service_charge_payments WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(payment_from_row).transpose()
    }

    async fn try_settle_payment(
        &self,
        idempotency_key: &str,
        terminal: ServiceChargeStatus,
        gateway_transaction_id: Option<&str>,
        signature: &str,
    ) -> Result<SettleOutcome, StoreError> {
        let settled: Option<Uuid> = sqlx::query_scalar(
            "UPDATE service_charge_payments
             SET status = $2,
                 gateway_transaction_id = COALESCE($3, gateway_transaction_id),
                 consumed_signatures = array_append(consumed_signatures, $4),
                 version = version + 1
             WHERE idempotency_key = $1 AND status IN ('pending', 'processing')
             RETURNING id",
        )
        .bind(idempotency_key)
        .bind(terminal.as_str())
        .bind(gateway_transaction_id)
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        if settled.is_some() {
            return Ok(SettleOutcome::Settled);
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM service_charge_payments WHERE idempotency_key = $1)",
        )
        .bind(idempotency_key)
        .fetch_one(&self.pool)
        .await?;
        if exists {
            Ok(SettleOutcome::AlreadyTerminal)
        } else {
            Ok(SettleOutcome::Missing)
        }
    }

    async fn signature_consumed(
        &self,
        idempotency_key: &str,
        signature: &str,
    ) -> Result<bool, StoreError> {
        let consumed: Option<bool> = sqlx::query_scalar(
            "SELECT $2 = ANY(consumed_signatures)
             FROM service_charge_payments WHERE idempotency_key = $1",
        )
        .bind(idempotency_key)
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;
        Ok(consumed.unwrap_or(false))
    }

    async fn exhibition_gate(
        &self,
        exhibition_id: i64,
    ) -> Result<Option<ExhibitionGate>, StoreError> {
        let row: Option<(i64, String, bool)> = sqlx::query_as(
            "SELECT exhibition_id, status, is_active FROM exhibitions WHERE exhibition_id = $1",
        )
        .bind(exhibition_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(exhibition_id, status, is_active)| ExhibitionGate {
            exhibition_id,
            status,
            is_active,
        }))
    }

    async fn set_exhibition_gate(&self, gate: &ExhibitionGate) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO exhibitions (exhibition_id, status, is_active)
             VALUES ($1, $2, $3)
             ON CONFLICT (exhibition_id) DO UPDATE SET status = $2, is_active = $3",
        )
        .bind(gate.exhibition_id)
        .bind(&gate.status)
        .bind(gate.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reservations_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Stall>, StoreError> {
        let rows: Vec<StallRow> = sqlx::query_as(&format!(
            "SELECT {STALL_COLUMNS} FROM stalls
             WHERE status = 'reserved' AND reserved_at < $1
             ORDER BY id"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(stall_from_row).collect()
    }

    async fn pending_payments_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ServiceChargePayment>, StoreError> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM service_charge_payments
             WHERE status = 'pending' AND created_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(payment_from_row).collect()
    }
}
