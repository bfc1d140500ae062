use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::AppError;
use crate::models::{SeatId, SeatRow, SeatStatus, ShowId, UserId};

/// Target state of a [`SeatAvailabilityStore::bulk_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatTransition {
    Free,
    Held {
        user_id: UserId,
        expires_at: DateTime<Utc>,
    },
    Reserved,
}

impl SeatTransition {
    pub fn status(&self) -> SeatStatus {
        match self {
            SeatTransition::Free => SeatStatus::Free,
            SeatTransition::Held { .. } => SeatStatus::Held,
            SeatTransition::Reserved => SeatStatus::Reserved,
        }
    }

    pub fn held_by(&self) -> Option<UserId> {
        match self {
            SeatTransition::Held { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }

    pub fn hold_expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            SeatTransition::Held { expires_at, .. } => Some(*expires_at),
            _ => None,
        }
    }
}

/// Per-(show, seat) status and price.
///
/// Locks are per seat row, never per show: decisions about one seat are
/// serialized while other seats of the same show proceed in parallel.
#[async_trait]
pub trait SeatAvailabilityStore: Send {
    /// Takes the exclusive row lock on (show, seat) and returns the row.
    /// Blocks while another transaction holds it.
    async fn lock_and_get_status(
        &mut self,
        show_id: ShowId,
        seat_id: SeatId,
    ) -> Result<Option<SeatRow>, AppError>;

    /// Locks every existing row among `seat_ids` in ascending seat order.
    /// Missing seats are skipped.
    async fn lock_seats(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatRow>, AppError>;

    /// Moves every given row to `transition`, bumping `version`.
    ///
    /// `seats` must be rows read under this transaction's lock; a row whose
    /// version moved since is a version conflict and fails the call.
    async fn bulk_transition(
        &mut self,
        show_id: ShowId,
        seats: &[SeatRow],
        transition: SeatTransition,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn prices_for_seats(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<HashMap<SeatId, i64>, AppError>;

    /// Changes a locked seat's price. Status is untouched.
    async fn set_price(
        &mut self,
        show_id: ShowId,
        seat: &SeatRow,
        price_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AppError>;
}

pub(crate) fn version_conflict(show_id: ShowId) -> AppError {
    AppError::Internal(format!("version conflict on show {} seat rows", show_id))
}
