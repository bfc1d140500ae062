use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};

use crate::error::AppError;
use crate::models::{SeatHold, SeatId, ShowId, UserId};

/// Time-limited hold records.
///
/// Lock order is `show_seats` before `seat_holds`: the lookups here take no
/// locks, and the deletes are only issued for seats whose status rows the
/// caller already holds locked.
#[async_trait]
pub trait HoldLedger: Send {
    /// Seats of the show covered by a hold whose `expires_at` is at or
    /// before `now`, ascending. Plain read.
    async fn expired_hold_seats(
        &mut self,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, AppError>;

    /// Deletes the expired holds among `seat_ids` and returns the seats they
    /// covered. A hold that is live again by now is kept.
    async fn delete_expired_holds(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, AppError>;

    /// One hold per seat, all expiring at `now + ttl`, inserted as one batch.
    async fn create_holds(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<SeatHold>, AppError>;

    async fn active_holds_for(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatHold>, AppError>;

    /// Whether a live hold exists for the seat, optionally restricted to one
    /// holder. Answered from the hold records alone, not from the seat row.
    async fn has_active_hold(
        &mut self,
        show_id: ShowId,
        seat_id: SeatId,
        holder: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Seats the user has a hold on, expired or not, ascending. Plain read.
    async fn hold_seats_of(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
    ) -> Result<Vec<SeatId>, AppError>;

    /// Deletes the user's holds on `seat_ids`, expired or not.
    async fn release_holds_for(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, AppError>;
}

/// Opaque hold token built from two v4 uuids (244 random bits).
pub fn new_hold_token() -> String {
    let mut bytes = [0u8; 32];
    bytes[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(bytes)
}
