use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a stall. The only legal edges are:
/// `Available -> Reserved -> Booked`, `Reserved -> Available` (release,
/// reject, hold timeout) and `Booked -> Available` (admin cancel). Every
/// edge goes through a version-checked transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallStatus {
    Available,
    Reserved,
    Booked,
    Unavailable,
}

impl StallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StallStatus::Available => "available",
            StallStatus::Reserved => "reserved",
            StallStatus::Booked => "booked",
            StallStatus::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(StallStatus::Available),
            "reserved" => Some(StallStatus::Reserved),
            "booked" => Some(StallStatus::Booked),
            "unavailable" => Some(StallStatus::Unavailable),
            _ => None,
        }
    }
}

/// A bookable physical unit within an exhibition hall.
///
/// `version` is the optimistic concurrency token: it is bumped on every
/// committed transition and never regresses. `status` and `version` always
/// change together, atomically, in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stall {
    pub id: i64,
    pub exhibition_id: i64,
    pub hall_id: i64,
    pub stall_number: String,
    pub price: f64,
    pub area_sqm: f64,
    pub status: StallStatus,
    pub version: i64,
    /// Booking currently occupying the stall; required for Reserved/Booked.
    pub holder: Option<Uuid>,
    /// Set when the stall enters Reserved; drives the hold sweep.
    pub reserved_at: Option<DateTime<Utc>>,
}

impl Stall {
    pub fn new(
        id: i64,
        exhibition_id: i64,
        hall_id: i64,
        stall_number: impl Into<String>,
        price: f64,
        area_sqm: f64,
    ) -> Self {
        Self {
            id,
            exhibition_id,
            hall_id,
            stall_number: stall_number.into(),
            price,
            area_sqm,
            status: StallStatus::Available,
            version: 1,
            holder: None,
            reserved_at: None,
        }
    }
}
