//! Lazy expiration of holds.
//!
//! There is no background sweeper: every request that needs accurate
//! availability for a show first purges that show's expired holds and frees
//! their seats inside its own transaction. A failure here fails the whole
//! request, since deciding on top of stale holds is worse than not deciding.
//!
//! Status rows are locked before hold records are deleted, the same order
//! every protocol uses, so a purge never deadlocks against a confirm.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::AppError;
use crate::models::{SeatId, SeatRow, SeatStatus, ShowId};
use crate::storage::{BookingTx, SeatTransition};

/// Deletes the show's expired holds and moves their seats back to FREE.
/// Returns the seats that were freed, ascending.
pub async fn expire_holds(
    tx: &mut dyn BookingTx,
    show_id: ShowId,
    now: DateTime<Utc>,
) -> Result<Vec<SeatId>, AppError> {
    let candidates = tx.expired_hold_seats(show_id, now).await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let locked = tx.lock_seats(show_id, &candidates).await?;
    let expired = tx.delete_expired_holds(show_id, &candidates, now).await?;
    let stale: Vec<SeatRow> = locked
        .into_iter()
        .filter(|row| {
            row.status == SeatStatus::Held
                && row.hold_expires_at.map_or(true, |expires_at| expires_at <= now)
        })
        .collect();

    tx.bulk_transition(show_id, &stale, SeatTransition::Free, now)
        .await?;

    let freed: Vec<SeatId> = stale.iter().map(|row| row.seat_id).collect();
    debug!(
        "show {}: purged {} expired holds, freed seats {:?}",
        show_id,
        expired.len(),
        freed
    );
    Ok(freed)
}
