pub mod booking;
pub mod exhibition;
pub mod payment;
pub mod stall;

pub use booking::{Booking, BookingDraft, BookingStatus, PaymentState};
pub use exhibition::ExhibitionGate;
pub use payment::{ServiceChargePayment, ServiceChargeStatus};
pub use stall::{Stall, StallStatus};
