use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    CancellationTarget, Reservation, ReservationId, ReservedSeat, SeatId, ShowId, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorKind {
    Customer,
    Owner,
}

/// Who is asking. Customers own their reservations, owners own the halls
/// the reserved shows play in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub kind: ActorKind,
}

impl Actor {
    pub fn customer(id: UserId) -> Self {
        Self { id, kind: ActorKind::Customer }
    }

    pub fn owner(id: UserId) -> Self {
        Self { id, kind: ActorKind::Owner }
    }
}

/// Result of a successful cancellation: the seats to hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledReservation {
    pub reservation_id: ReservationId,
    pub show_id: ShowId,
    pub seat_ids: Vec<SeatId>,
}

#[async_trait]
pub trait ReservationLedger: Send {
    /// Inserts a `CONFIRMED` reservation.
    async fn create_reservation(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        total_amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError>;

    async fn attach_seats(
        &mut self,
        reservation_id: ReservationId,
        show_id: ShowId,
        seats: &[ReservedSeat],
    ) -> Result<(), AppError>;

    /// Loads and locks the reservation together with its show's start time
    /// and hall owner.
    async fn find_cancellation_target(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<CancellationTarget>, AppError>;

    /// Deletes the reservation and its seats, returning the seat ids.
    async fn delete_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<SeatId>, AppError>;

    async fn cancel_if_owned_and_future(
        &mut self,
        reservation_id: ReservationId,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<CancelledReservation, AppError> {
        let target = self
            .find_cancellation_target(reservation_id)
            .await?
            .ok_or_else(|| AppError::not_found("reservation"))?;

        authorize_cancel(&target, actor, now)?;

        let mut seat_ids = self.delete_reservation(reservation_id).await?;
        seat_ids.sort_unstable();

        Ok(CancelledReservation {
            reservation_id,
            show_id: target.show_id,
            seat_ids,
        })
    }
}

/// Ownership first, then the start-time check: a stranger learns nothing
/// about when the show starts.
pub fn authorize_cancel(
    target: &CancellationTarget,
    actor: Actor,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let owns = match actor.kind {
        ActorKind::Customer => target.user_id == actor.id,
        ActorKind::Owner => target.hall_owner_id == actor.id,
    };
    if !owns {
        return Err(AppError::Forbidden(
            "reservation does not belong to you".to_string(),
        ));
    }
    if target.show_starts_at <= now {
        return Err(AppError::Conflict("show already started".to_string()));
    }
    Ok(())
}
