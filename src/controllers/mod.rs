use axum::Router;
use std::sync::Arc;

use crate::AppState;

pub mod bookings;
pub mod payment;
pub mod ws;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(bookings::routes())
        .merge(payment::routes())
        .merge(ws::routes())
}
