use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::CoreError;
use crate::middleware::RequestActor;
use crate::models::{ServiceChargePayment, ServiceChargeStatus};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/service-charge/initiate", post(initiate_service_charge))
        .route("/service-charge/{key}", get(service_charge_status))
        // The gateway name is informational; the signature contract is the
        // same for every provider we accept callbacks from.
        .route("/service-charge/{gateway}/callback", post(gateway_callback))
}

// POST /api/service-charge/initiate
#[derive(Debug, Deserialize, Validate)]
struct InitiateRequest {
    exhibition_id: i64,
    booking_id: Option<Uuid>,
    #[validate(range(min = 1.0))]
    amount: f64,
    description: Option<String>,
}

async fn initiate_service_charge(
    State(state): State<Arc<AppState>>,
    _actor: RequestActor,
    Json(req): Json<InitiateRequest>,
) -> Result<impl IntoResponse, CoreError> {
    req.validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;

    // The row exists before the gateway learns the key, so a callback can
    // never arrive for a transaction we do not know about.
    let payment = ServiceChargePayment::new(
        format!("sc-{}", Uuid::new_v4()),
        req.exhibition_id,
        req.booking_id,
        req.amount,
    );
    state
        .store
        .insert_payment(&payment)
        .await
        .map_err(CoreError::from)?;

    let description = req
        .description
        .unwrap_or_else(|| format!("service charge for exhibition {}", req.exhibition_id));
    let amount_minor = (req.amount * 100.0).round() as i64;

    let pay_cfg = &state.config.payment;
    let order = state
        .settlement
        .submit(state.gateway.create_order(
            amount_minor,
            &payment.idempotency_key,
            &description,
            &pay_cfg.success_url,
            &pay_cfg.fail_url,
            &pay_cfg.webhook_url,
        ))
        .await;

    let order = match order {
        Ok(order) if order.success => order,
        Ok(order) => {
            let message = order.message.unwrap_or_else(|| "gateway declined".into());
            fail_unstarted_payment(&state, &payment.idempotency_key).await;
            return Err(CoreError::Gateway(message));
        }
        Err(err) => {
            // QueueFull/Timeout stay pending; the sweep will fail them if the
            // gateway never created the order.
            if matches!(err, CoreError::Gateway(_)) {
                fail_unstarted_payment(&state, &payment.idempotency_key).await;
            }
            return Err(err);
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "idempotency_key": payment.idempotency_key,
            "payment_url": order.payment_url,
            "gateway_transaction_id": order.transaction_id,
            "amount": req.amount,
        })),
    ))
}

async fn fail_unstarted_payment(state: &Arc<AppState>, idempotency_key: &str) {
    if let Err(err) = state
        .store
        .try_settle_payment(
            idempotency_key,
            ServiceChargeStatus::Failed,
            None,
            "order-creation-failed",
        )
        .await
    {
        tracing::warn!(idempotency_key, "could not mark failed payment: {err}");
    }
}

// GET /api/service-charge/{key}
async fn service_charge_status(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    _actor: RequestActor,
) -> Result<Json<ServiceChargePayment>, CoreError> {
    let payment = state
        .store
        .payment_by_key(&key)
        .await
        .map_err(CoreError::from)?
        .ok_or(CoreError::NotFound)?;
    Ok(Json(payment))
}

// POST /api/service-charge/{gateway}-callback
//
// Acknowledges with 200 for every authenticated payload that matches a known
// transaction, duplicates included, so the gateway stops retrying. Non-200
// responses are reserved for auth, parse and unknown-transaction failures.
async fn gateway_callback(
    State(state): State<Arc<AppState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, CoreError> {
    tracing::debug!(gateway = %gateway, bytes = body.len(), "gateway callback received");
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let ack = state.reconciliation.reconcile(&body, authorization).await?;
    Ok((StatusCode::OK, Json(ack)))
}
