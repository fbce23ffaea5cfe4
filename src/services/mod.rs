pub mod coordinator;
pub mod gateway;
pub mod guard;
pub mod settlement;
pub mod sweeper;
pub mod webhook;

pub use coordinator::BookingCoordinator;
pub use gateway::PaymentGatewayClient;
pub use guard::{GuardConfig, SubmissionGuard};
pub use settlement::SettlementQueue;
pub use sweeper::HoldSweeper;
pub use webhook::ReconciliationService;
