//! Hold, confirm, release and cancel protocols.
//!
//! Each call runs in exactly one storage transaction. Seats are locked one
//! row at a time in ascending seat id order, so two requests over
//! overlapping seat sets always queue on the same first seat instead of
//! deadlocking. Any error drops the transaction, which rolls it back and
//! releases every lock; nothing is retried here.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::notifications::{publish_in_background, BookingConfirmedEvent, BookingEventSink};
use super::reconciler;
use crate::clock::Clock;
use crate::error::AppError;
use crate::models::{
    ReservationDetail, ReservationId, ReservedSeat, SeatId, SeatMapEntry, SeatRow, SeatStatus,
    ShowId, UserId,
};
use crate::storage::reservations::CancelledReservation;
use crate::storage::{Actor, SeatTransition, Storage};

pub const DEFAULT_HOLD_TTL_SECONDS: i64 = 300;

/// Knobs of the booking protocols, fixed at construction.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub hold_ttl: Duration,
    /// How long a transaction waits for a row lock before giving up.
    pub lock_timeout: std::time::Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::seconds(DEFAULT_HOLD_TTL_SECONDS),
            lock_timeout: std::time::Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldReceipt {
    pub expires_at: DateTime<Utc>,
    pub seat_ids: Vec<SeatId>,
}

/// A refused batch is an ordinary answer, not an error: it carries every
/// seat that failed the check so the client can pick again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    Held(HoldReceipt),
    Unavailable(Vec<SeatId>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmReceipt {
    pub reservation_id: ReservationId,
    pub total_amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed(ConfirmReceipt),
    Unavailable(Vec<SeatId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatPrice {
    pub seat_id: SeatId,
    pub price_cents: i64,
}

#[derive(Clone)]
pub struct ReservationCoordinator {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn BookingEventSink>,
    policy: BookingPolicy,
}

impl ReservationCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn BookingEventSink>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            storage,
            clock,
            events,
            policy,
        }
    }

    /// Holds every requested seat for `hold_ttl`, or none of them.
    pub async fn hold_seats(
        &self,
        user_id: UserId,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<HoldOutcome, AppError> {
        let requested = normalize_seat_ids(seat_ids)?;
        let now = self.clock.now();

        let mut tx = self.storage.begin().await?;
        if tx.find_show(show_id).await?.is_none() {
            return Err(AppError::not_found("show"));
        }
        reconciler::expire_holds(tx.as_mut(), show_id, now).await?;

        let mut holdable: Vec<SeatRow> = Vec::with_capacity(requested.len());
        let mut unavailable: Vec<SeatId> = Vec::new();
        for seat_id in &requested {
            let row = match tx.lock_and_get_status(show_id, *seat_id).await? {
                Some(row) if row.is_free() => row,
                _ => {
                    unavailable.push(*seat_id);
                    continue;
                }
            };
            // a FREE row with a live hold record means the two drifted apart
            if tx.has_active_hold(show_id, *seat_id, None, now).await? {
                unavailable.push(*seat_id);
            } else {
                holdable.push(row);
            }
        }

        if !unavailable.is_empty() {
            tx.rollback().await?;
            warn!(
                "user {} hold on show {} refused, unavailable seats {:?}",
                user_id, show_id, unavailable
            );
            return Ok(HoldOutcome::Unavailable(unavailable));
        }

        let holds = tx
            .create_holds(user_id, show_id, &requested, now, self.policy.hold_ttl)
            .await?;
        let expires_at = now + self.policy.hold_ttl;
        tx.bulk_transition(
            show_id,
            &holdable,
            SeatTransition::Held { user_id, expires_at },
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            "user {} holds {} seats on show {} until {}",
            user_id,
            holds.len(),
            show_id,
            expires_at
        );
        Ok(HoldOutcome::Held(HoldReceipt {
            expires_at,
            seat_ids: requested,
        }))
    }

    /// Drops all of the user's holds for the show. Returns how many seats
    /// were released; zero when there was nothing to release.
    pub async fn release_holds(&self, user_id: UserId, show_id: ShowId) -> Result<usize, AppError> {
        let now = self.clock.now();

        let mut tx = self.storage.begin().await?;
        reconciler::expire_holds(tx.as_mut(), show_id, now).await?;

        let candidates = tx.hold_seats_of(user_id, show_id).await?;
        let locked = tx.lock_seats(show_id, &candidates).await?;
        let released = tx.release_holds_for(user_id, show_id, &candidates).await?;
        let rows: Vec<SeatRow> = locked
            .into_iter()
            .filter(|row| {
                released.contains(&row.seat_id)
                    && row.status == SeatStatus::Held
                    && row.held_by == Some(user_id)
            })
            .collect();
        tx.bulk_transition(show_id, &rows, SeatTransition::Free, now)
            .await?;
        tx.commit().await?;

        if !released.is_empty() {
            info!("user {} released {} seats on show {}", user_id, released.len(), show_id);
        }
        Ok(released.len())
    }

    /// Turns all of the user's live holds for the show into one reservation,
    /// priced at the seats' current prices.
    pub async fn confirm(&self, user_id: UserId, show_id: ShowId) -> Result<ConfirmOutcome, AppError> {
        let now = self.clock.now();

        let mut tx = self.storage.begin().await?;
        if tx.find_show(show_id).await?.is_none() {
            return Err(AppError::not_found("show"));
        }
        reconciler::expire_holds(tx.as_mut(), show_id, now).await?;

        let holds = tx.active_holds_for(user_id, show_id, now).await?;
        if holds.is_empty() {
            tx.rollback().await?;
            return Err(AppError::Validation(
                "no active holds for this show".to_string(),
            ));
        }
        let mut seat_ids: Vec<SeatId> = holds.iter().map(|hold| hold.seat_id).collect();
        seat_ids.sort_unstable();
        seat_ids.dedup();

        let mut held: Vec<SeatRow> = Vec::with_capacity(seat_ids.len());
        let mut unavailable: Vec<SeatId> = Vec::new();
        for seat_id in &seat_ids {
            let row = tx.lock_and_get_status(show_id, *seat_id).await?;
            // status and hold ownership live in separate records, check both
            let still_mine = tx
                .has_active_hold(show_id, *seat_id, Some(user_id), now)
                .await?;
            match row {
                Some(row) if row.is_held_by(user_id, now) && still_mine => held.push(row),
                _ => unavailable.push(*seat_id),
            }
        }

        if !unavailable.is_empty() {
            tx.rollback().await?;
            warn!(
                "user {} confirm on show {} refused, unavailable seats {:?}",
                user_id, show_id, unavailable
            );
            return Ok(ConfirmOutcome::Unavailable(unavailable));
        }

        let prices = tx.prices_for_seats(show_id, &seat_ids).await?;
        let seats = seat_ids
            .iter()
            .map(|seat_id| {
                prices
                    .get(seat_id)
                    .map(|price_cents| ReservedSeat {
                        seat_id: *seat_id,
                        price_cents: *price_cents,
                    })
                    .ok_or_else(|| AppError::Internal(format!("no price for seat {}", seat_id)))
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        let total_amount_cents: i64 = seats.iter().map(|seat| seat.price_cents).sum();

        let reservation = tx
            .create_reservation(user_id, show_id, total_amount_cents, now)
            .await?;
        tx.attach_seats(reservation.id, show_id, &seats).await?;
        tx.bulk_transition(show_id, &held, SeatTransition::Reserved, now)
            .await?;
        tx.release_holds_for(user_id, show_id, &seat_ids).await?;
        tx.commit().await?;

        info!(
            "user {} confirmed reservation {} on show {}: {} seats, {} cents",
            user_id,
            reservation.id,
            show_id,
            seats.len(),
            total_amount_cents
        );
        publish_in_background(
            self.events.clone(),
            BookingConfirmedEvent::new(&reservation, seats),
        );

        Ok(ConfirmOutcome::Confirmed(ConfirmReceipt {
            reservation_id: reservation.id,
            total_amount_cents,
        }))
    }

    /// Cancels a reservation before its show starts and frees its seats.
    pub async fn cancel(
        &self,
        reservation_id: ReservationId,
        actor: Actor,
    ) -> Result<CancelledReservation, AppError> {
        let now = self.clock.now();

        let mut tx = self.storage.begin().await?;
        let cancelled = tx
            .cancel_if_owned_and_future(reservation_id, actor, now)
            .await?;
        let rows: Vec<SeatRow> = tx
            .lock_seats(cancelled.show_id, &cancelled.seat_ids)
            .await?
            .into_iter()
            .filter(|row| row.status == SeatStatus::Reserved)
            .collect();
        tx.bulk_transition(cancelled.show_id, &rows, SeatTransition::Free, now)
            .await?;
        tx.commit().await?;

        info!(
            "reservation {} cancelled by {:?} {}, {} seats freed on show {}",
            reservation_id,
            actor.kind,
            actor.id,
            rows.len(),
            cancelled.show_id
        );
        Ok(cancelled)
    }

    /// Owner-side price change. Holds keep their seat; the new price applies
    /// to whoever confirms next.
    pub async fn reprice_seat(
        &self,
        owner_id: UserId,
        show_id: ShowId,
        seat_id: SeatId,
        price_cents: i64,
    ) -> Result<SeatPrice, AppError> {
        if price_cents < 0 {
            return Err(AppError::Validation(
                "price_cents must not be negative".to_string(),
            ));
        }
        let now = self.clock.now();

        let mut tx = self.storage.begin().await?;
        let show = tx
            .find_show(show_id)
            .await?
            .ok_or_else(|| AppError::not_found("show"))?;
        if show.owner_id != owner_id {
            return Err(AppError::Forbidden("show does not belong to you".to_string()));
        }
        let row = tx
            .lock_and_get_status(show_id, seat_id)
            .await?
            .ok_or_else(|| AppError::not_found("seat"))?;
        tx.set_price(show_id, &row, price_cents, now).await?;
        tx.commit().await?;

        info!(
            "owner {} repriced show {} seat {}: {} -> {} cents",
            owner_id, show_id, seat_id, row.price_cents, price_cents
        );
        Ok(SeatPrice { seat_id, price_cents })
    }

    pub async fn seat_map(&self, show_id: ShowId) -> Result<Vec<SeatMapEntry>, AppError> {
        self.storage
            .seat_map(show_id, self.clock.now())
            .await?
            .ok_or_else(|| AppError::not_found("show"))
    }

    pub async fn reservations_for(&self, user_id: UserId) -> Result<Vec<ReservationDetail>, AppError> {
        self.storage.reservations_for_user(user_id).await
    }

    /// Someone else's reservation is reported as missing.
    pub async fn reservation_for(
        &self,
        user_id: UserId,
        reservation_id: ReservationId,
    ) -> Result<ReservationDetail, AppError> {
        match self.storage.reservation_detail(reservation_id).await? {
            Some(detail) if detail.reservation.user_id == user_id => Ok(detail),
            _ => Err(AppError::not_found("reservation")),
        }
    }
}

/// De-duplicates and sorts ascending, which is also the lock order.
pub fn normalize_seat_ids(seat_ids: &[SeatId]) -> Result<Vec<SeatId>, AppError> {
    if seat_ids.is_empty() {
        return Err(AppError::Validation("seat_ids must not be empty".to_string()));
    }
    if let Some(bad) = seat_ids.iter().find(|seat_id| **seat_id <= 0) {
        return Err(AppError::Validation(format!("invalid seat id {}", bad)));
    }
    let mut ids = seat_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    Ok(ids)
}
