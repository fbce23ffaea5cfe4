//! Atomic Booking Coordinator: serializes concurrent claims on stalls with
//! per-stall compare-and-swap transitions only. No lock is held across
//! requests; the first writer to complete its CAS wins and everyone else
//! gets a typed conflict naming the stalls they lost.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Booking, BookingDraft, BookingStatus, Stall, StallStatus};
use crate::realtime::{BroadcastHub, StallEvent};
use crate::store::{ReservationStore, StoreError};

#[derive(Clone)]
pub struct BookingCoordinator {
    store: Arc<dyn ReservationStore>,
    hub: Arc<BroadcastHub>,
}

impl BookingCoordinator {
    pub fn new(store: Arc<dyn ReservationStore>, hub: Arc<BroadcastHub>) -> Self {
        Self { store, hub }
    }

    /// All-or-nothing claim of `stall_ids` for a new booking.
    ///
    /// Fail-fast order: exhibition gate, then a non-available pre-check that
    /// names every offending stall, then one CAS per stall in ascending id
    /// order. The ascending order means two claimants contending on an
    /// overlapping set collide on the lowest shared stall instead of
    /// deadlocking each other through opposite orderings. Any CAS loss rolls
    /// back the stalls already won in this attempt.
    pub async fn claim(
        &self,
        exhibition_id: i64,
        stall_ids: Vec<i64>,
        draft: BookingDraft,
    ) -> Result<Booking, CoreError> {
        let mut stall_ids = stall_ids;
        stall_ids.sort_unstable();
        stall_ids.dedup();
        if stall_ids.is_empty() {
            return Err(CoreError::Validation("at least one stall is required".into()));
        }

        // Gate is re-checked on every attempt: the exhibition can be
        // unpublished between listing and submission.
        self.check_gate(exhibition_id).await?;

        let stalls = self.store.read_stalls(&stall_ids).await?;
        if stalls.len() != stall_ids.len() {
            let known: Vec<i64> = stalls.iter().map(|s| s.id).collect();
            let missing: Vec<i64> = stall_ids
                .iter()
                .copied()
                .filter(|id| !known.contains(id))
                .collect();
            return Err(CoreError::Validation(format!("unknown stalls: {missing:?}")));
        }
        if let Some(foreign) = stalls.iter().find(|s| s.exhibition_id != exhibition_id) {
            return Err(CoreError::Validation(format!(
                "stall {} does not belong to exhibition {}",
                foreign.id, exhibition_id
            )));
        }

        // Partial claims are never granted: reject up front, listing every
        // stall that is not available right now.
        let taken: Vec<i64> = stalls
            .iter()
            .filter(|s| s.status != StallStatus::Available)
            .map(|s| s.id)
            .collect();
        if !taken.is_empty() {
            return Err(CoreError::Conflict { stall_ids: taken });
        }

        let amount = stalls.iter().map(|s| s.price).sum();
        let booking = Booking::from_draft(exhibition_id, stall_ids, amount, draft);

        let mut won: Vec<(i64, i64)> = Vec::with_capacity(stalls.len());
        for stall in &stalls {
            match self
                .store
                .try_transition(stall.id, stall.version, StallStatus::Reserved, Some(booking.id))
                .await
            {
                Ok(new_version) => won.push((stall.id, new_version)),
                Err(StoreError::Conflict { .. }) => {
                    self.rollback_reservations(&won).await;
                    info!(
                        stall_id = stall.id,
                        booking_id = %booking.id,
                        "claim lost the race, rolled back {} stalls",
                        won.len()
                    );
                    return Err(CoreError::Conflict {
                        stall_ids: vec![stall.id],
                    });
                }
                Err(other) => {
                    self.rollback_reservations(&won).await;
                    return Err(other.into());
                }
            }
        }

        if let Err(err) = self.store.insert_booking(&booking).await {
            self.rollback_reservations(&won).await;
            return Err(err.into());
        }

        for (stall_id, version) in &won {
            self.hub.publish(
                exhibition_id,
                StallEvent::booked(*stall_id, booking.id, StallStatus::Reserved, *version),
            );
        }
        info!(
            booking_id = %booking.id,
            exhibition_id,
            stalls = won.len(),
            "claim succeeded"
        );
        Ok(booking)
    }

    /// Admin acceptance of a pending booking. No stall transition happens
    /// here; stalls stay Reserved until payment confirms them.
    pub async fn approve(&self, booking_id: Uuid) -> Result<Booking, CoreError> {
        let booking = self.require_booking(booking_id).await?;
        let moved = self
            .store
            .update_booking(booking_id, &[BookingStatus::Pending], BookingStatus::Approved, None)
            .await?;
        if !moved {
            return Err(CoreError::Validation(format!(
                "booking {booking_id} is not pending and cannot be approved"
            )));
        }
        Ok(Booking {
            status: BookingStatus::Approved,
            ..booking
        })
    }

    /// The only operation allowed to move a stall Reserved -> Booked, and
    /// only for stalls already held by this booking.
    pub async fn confirm(&self, booking_id: Uuid) -> Result<Booking, CoreError> {
        let booking = self.require_booking(booking_id).await?;
        if !matches!(booking.status, BookingStatus::Pending | BookingStatus::Approved) {
            return Err(CoreError::Validation(format!(
                "booking {booking_id} is not confirmable from {:?}",
                booking.status
            )));
        }

        let stalls = self.store.read_stalls(&booking.stall_ids).await?;
        for stall in &stalls {
            if stall.holder != Some(booking.id) {
                return Err(CoreError::Conflict {
                    stall_ids: vec![stall.id],
                });
            }
        }

        let mut won: Vec<(i64, i64)> = Vec::with_capacity(stalls.len());
        for stall in &stalls {
            if stall.status == StallStatus::Booked {
                continue;
            }
            match self
                .store
                .try_transition(stall.id, stall.version, StallStatus::Booked, Some(booking.id))
                .await
            {
                Ok(version) => {
                    won.push((stall.id, version));
                    self.hub.publish(
                        booking.exhibition_id,
                        StallEvent::booked(stall.id, booking.id, StallStatus::Booked, version),
                    );
                }
                Err(StoreError::Conflict { .. }) => {
                    // A concurrent sweep or admin override beat this confirm.
                    return Err(CoreError::Conflict {
                        stall_ids: vec![stall.id],
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }

        let moved = self
            .store
            .update_booking(
                booking_id,
                &[BookingStatus::Pending, BookingStatus::Approved],
                BookingStatus::Confirmed,
                None,
            )
            .await?;
        if !moved {
            // A concurrent reject/cancel took the booking row between our
            // read and this update. Its release CAS already lost to the
            // Booked transitions above, so the stalls are freed here rather
            // than staying Booked under a terminal booking.
            for (stall_id, version) in &won {
                match self
                    .store
                    .try_transition(*stall_id, *version, StallStatus::Available, None)
                    .await
                {
                    Ok(new_version) => {
                        self.hub.publish(
                            booking.exhibition_id,
                            StallEvent::released(*stall_id, new_version),
                        );
                    }
                    Err(err) => {
                        warn!(stall_id = *stall_id, ?err, "failed to free stall after lost confirm");
                    }
                }
            }
            return Err(CoreError::Validation(format!(
                "booking {booking_id} was terminated concurrently"
            )));
        }
        info!(booking_id = %booking_id, "booking confirmed");
        Ok(Booking {
            status: BookingStatus::Confirmed,
            ..booking
        })
    }

    pub async fn reject(&self, booking_id: Uuid) -> Result<Booking, CoreError> {
        self.terminate(booking_id, BookingStatus::Rejected).await
    }

    pub async fn cancel(&self, booking_id: Uuid) -> Result<Booking, CoreError> {
        self.terminate(booking_id, BookingStatus::Cancelled).await
    }

    /// Shared path for reject/cancel: mark the booking terminal, then release
    /// every stall it still holds back to Available with a version bump.
    async fn terminate(&self, booking_id: Uuid, terminal: BookingStatus) -> Result<Booking, CoreError> {
        let booking = self.require_booking(booking_id).await?;
        let moved = self
            .store
            .update_booking(
                booking_id,
                &[
                    BookingStatus::Pending,
                    BookingStatus::Approved,
                    BookingStatus::Confirmed,
                ],
                terminal,
                None,
            )
            .await?;
        if !moved {
            return Err(CoreError::Validation(format!(
                "booking {booking_id} is already terminal"
            )));
        }

        let stalls = self.store.read_stalls(&booking.stall_ids).await?;
        for stall in stalls {
            if stall.holder != Some(booking.id) {
                continue; // already re-claimed by a newer booking
            }
            match self
                .store
                .try_transition(stall.id, stall.version, StallStatus::Available, None)
                .await
            {
                Ok(version) => {
                    self.hub
                        .publish(booking.exhibition_id, StallEvent::released(stall.id, version));
                }
                Err(StoreError::Conflict { current_version }) => {
                    warn!(
                        stall_id = stall.id,
                        current_version, "release lost a race, leaving stall as-is"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
        info!(booking_id = %booking_id, status = terminal.as_str(), "booking terminated");
        Ok(Booking {
            status: terminal,
            ..booking
        })
    }

    async fn check_gate(&self, exhibition_id: i64) -> Result<(), CoreError> {
        let gate = self.store.exhibition_gate(exhibition_id).await?;
        match gate {
            Some(gate) if gate.is_claimable() => Ok(()),
            _ => Err(CoreError::ExhibitionUnavailable),
        }
    }

    async fn require_booking(&self, booking_id: Uuid) -> Result<Booking, CoreError> {
        self.store
            .booking(booking_id)
            .await?
            .ok_or(CoreError::NotFound)
    }

    /// Undo the reservations made earlier in a failed claim attempt, using
    /// the versions returned by the successful CAS calls. A rollback that
    /// itself conflicts means someone legitimately transitioned the stall
    /// after us; that transition wins.
    async fn rollback_reservations(&self, won: &[(i64, i64)]) {
        for (stall_id, version) in won {
            if let Err(err) = self
                .store
                .try_transition(*stall_id, *version, StallStatus::Available, None)
                .await
            {
                warn!(stall_id = *stall_id, ?err, "failed to roll back reservation");
            }
        }
    }

    /// Read-only snapshot used by listing endpoints and reconnecting
    /// realtime clients to resynchronize with authoritative state.
    pub async fn stall_snapshot(&self, exhibition_id: i64) -> Result<Vec<Stall>, CoreError> {
        Ok(self.store.list_stalls(exhibition_id).await?)
    }
}
