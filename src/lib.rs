pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use crate::realtime::BroadcastHub;
use crate::services::{
    BookingCoordinator, PaymentGatewayClient, ReconciliationService, SettlementQueue,
};
use crate::store::ReservationStore;

// Shared state for the whole application.
pub struct AppState {
    pub store: Arc<dyn ReservationStore>,
    pub coordinator: BookingCoordinator,
    pub reconciliation: ReconciliationService,
    pub settlement: Arc<SettlementQueue>,
    pub gateway: PaymentGatewayClient,
    pub hub: Arc<BroadcastHub>,
    pub config: config::Config,
}

impl AppState {
    /// Wire every service off one store handle. The store decides whether
    /// this process is backed by Postgres or runs entirely in memory.
    pub fn build(config: config::Config, store: Arc<dyn ReservationStore>) -> Arc<Self> {
        let hub = Arc::new(BroadcastHub::default());
        let coordinator = BookingCoordinator::new(store.clone(), hub.clone());
        let reconciliation = ReconciliationService::new(
            store.clone(),
            coordinator.clone(),
            &config.webhook.username,
            &config.webhook.password,
        );
        let settlement = Arc::new(SettlementQueue::new(
            config.settlement.max_concurrent,
            Duration::from_secs(config.settlement.timeout_seconds),
        ));
        let gateway = PaymentGatewayClient::from_config(
            &config.payment,
            config.circuit_breaker.failure_threshold,
            Duration::from_secs(config.circuit_breaker.timeout_seconds),
        );

        Arc::new(Self {
            store,
            coordinator,
            reconciliation,
            settlement,
            gateway,
            hub,
            config,
        })
    }
}
