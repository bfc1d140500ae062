//! In-process storage backend.
//!
//! One async mutex guards the whole state; a transaction holds it from
//! `begin` until commit or drop and works on a private copy, so every
//! transaction is serializable and a rollback is simply discarding the copy.
//! The constraints the Postgres schema enforces (one hold per seat, one
//! reservation per seat, version match, HELD iff a hold reference is set)
//! are checked here as well.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::availability::version_conflict;
use super::holds::new_hold_token;
use super::{
    BookingTx, HoldLedger, ReservationLedger, SeatAvailabilityStore, SeatTransition, ShowCatalog,
    Storage,
};
use crate::error::AppError;
use crate::models::{
    CancellationTarget, Reservation, ReservationDetail, ReservationId, ReservationStatus,
    ReservedSeat, ReservedSeatDetail, SeatHold, SeatId, SeatMapEntry, SeatRow, SeatStatus, ShowId,
    ShowInfo, UserId,
};

#[derive(Debug, Clone)]
struct CatalogSeat {
    row_label: String,
    seat_number: i32,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    shows: HashMap<ShowId, ShowInfo>,
    seats: HashMap<SeatId, CatalogSeat>,
    show_seats: BTreeMap<(ShowId, SeatId), SeatRow>,
    holds: BTreeMap<i64, SeatHold>,
    reservations: BTreeMap<ReservationId, Reservation>,
    // (show, seat) -> (reservation, price)
    reservation_seats: BTreeMap<(ShowId, SeatId), (ReservationId, i64)>,
    next_hold_id: i64,
    next_reservation_id: i64,
}

impl MemoryState {
    fn detail(&self, reservation: &Reservation) -> ReservationDetail {
        let seats = self
            .reservation_seats
            .range((reservation.show_id, SeatId::MIN)..=(reservation.show_id, SeatId::MAX))
            .filter(|(_, (reservation_id, _))| *reservation_id == reservation.id)
            .map(|((_, seat_id), (_, price_cents))| {
                let catalog = self.seats.get(seat_id);
                ReservedSeatDetail {
                    seat_id: *seat_id,
                    row_label: catalog.map(|s| s.row_label.clone()).unwrap_or_default(),
                    seat_number: catalog.map(|s| s.seat_number).unwrap_or_default(),
                    price_cents: *price_cents,
                }
            })
            .collect();

        let show_starts_at = self
            .shows
            .get(&reservation.show_id)
            .map(|show| show.starts_at)
            .unwrap_or(reservation.created_at);

        ReservationDetail {
            reservation: reservation.clone(),
            show_starts_at,
            seats,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeatSeed {
    pub seat_id: SeatId,
    pub row_label: String,
    pub seat_number: i32,
    pub price_cents: i64,
}

/// A scheduled show with its hall and the seats that get a `show_seats` row.
#[derive(Debug, Clone)]
pub struct ShowSeed {
    pub show_id: ShowId,
    pub hall_id: i64,
    pub owner_id: UserId,
    pub starts_at: DateTime<Utc>,
    pub seats: Vec<SeatSeed>,
}

impl ShowSeed {
    /// `rows` × `per_row` seats labelled A, B, C…, numbered from 1, seat ids
    /// starting at 1, all at the same price.
    pub fn grid(
        show_id: ShowId,
        owner_id: UserId,
        starts_at: DateTime<Utc>,
        rows: u8,
        per_row: i32,
        price_cents: i64,
    ) -> Self {
        let mut seats = Vec::new();
        let mut seat_id = 1;
        for row in 0..rows {
            let row_label = char::from(b'A' + row % 26).to_string();
            for seat_number in 1..=per_row {
                seats.push(SeatSeed {
                    seat_id,
                    row_label: row_label.clone(),
                    seat_number,
                    price_cents,
                });
                seat_id += 1;
            }
        }
        Self {
            show_id,
            hall_id: show_id,
            owner_id,
            starts_at,
            seats,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a show: registers its seats and creates one FREE row each.
    pub async fn seed_show(&self, seed: ShowSeed) {
        let mut state = self.state.lock().await;
        state.shows.insert(
            seed.show_id,
            ShowInfo {
                id: seed.show_id,
                hall_id: seed.hall_id,
                owner_id: seed.owner_id,
                starts_at: seed.starts_at,
            },
        );
        for seat in seed.seats {
            state.seats.insert(
                seat.seat_id,
                CatalogSeat {
                    row_label: seat.row_label,
                    seat_number: seat.seat_number,
                },
            );
            state.show_seats.insert(
                (seed.show_id, seat.seat_id),
                SeatRow {
                    seat_id: seat.seat_id,
                    status: SeatStatus::Free,
                    price_cents: seat.price_cents,
                    version: 0,
                    held_by: None,
                    hold_expires_at: None,
                },
            );
        }
    }

    /// Raw status rows of a show, ascending by seat id.
    pub async fn seat_rows(&self, show_id: ShowId) -> Vec<SeatRow> {
        let state = self.state.lock().await;
        state
            .show_seats
            .range((show_id, SeatId::MIN)..=(show_id, SeatId::MAX))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Every hold record of a show, expired ones included.
    pub async fn holds(&self, show_id: ShowId) -> Vec<SeatHold> {
        let state = self.state.lock().await;
        state
            .holds
            .values()
            .filter(|hold| hold.show_id == show_id)
            .cloned()
            .collect()
    }

    /// Seats attached to some reservation of the show.
    pub async fn reserved_seat_ids(&self, show_id: ShowId) -> Vec<SeatId> {
        let state = self.state.lock().await;
        state
            .reservation_seats
            .range((show_id, SeatId::MIN)..=(show_id, SeatId::MAX))
            .map(|((_, seat_id), _)| *seat_id)
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn BookingTx>, AppError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard: Some(guard),
            work,
        }))
    }

    async fn seat_map(
        &self,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<SeatMapEntry>>, AppError> {
        let state = self.state.lock().await;
        if !state.shows.contains_key(&show_id) {
            return Ok(None);
        }

        let mut entries: Vec<SeatMapEntry> = state
            .show_seats
            .range((show_id, SeatId::MIN)..=(show_id, SeatId::MAX))
            .map(|((_, seat_id), row)| {
                let catalog = state.seats.get(seat_id);
                let status = match row.hold_expires_at {
                    Some(expires_at) if row.status == SeatStatus::Held && expires_at <= now => {
                        SeatStatus::Free
                    }
                    _ => row.status,
                };
                SeatMapEntry {
                    seat_id: *seat_id,
                    row_label: catalog.map(|s| s.row_label.clone()).unwrap_or_default(),
                    seat_number: catalog.map(|s| s.seat_number).unwrap_or_default(),
                    status,
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.row_label.as_str(), a.seat_number).cmp(&(b.row_label.as_str(), b.seat_number))
        });
        Ok(Some(entries))
    }

    async fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationDetail>, AppError> {
        let state = self.state.lock().await;
        let mut items: Vec<ReservationDetail> = state
            .reservations
            .values()
            .filter(|reservation| reservation.user_id == user_id)
            .map(|reservation| state.detail(reservation))
            .collect();
        items.sort_by(|a, b| {
            b.reservation
                .created_at
                .cmp(&a.reservation.created_at)
                .then(b.reservation.id.cmp(&a.reservation.id))
        });
        Ok(items)
    }

    async fn reservation_detail(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationDetail>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .get(&reservation_id)
            .map(|reservation| state.detail(reservation)))
    }
}

pub struct MemoryTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    work: MemoryState,
}

impl MemoryTx {
    fn state(&mut self) -> Result<&mut MemoryState, AppError> {
        if self.guard.is_none() {
            return Err(AppError::Internal("transaction already finished".to_string()));
        }
        Ok(&mut self.work)
    }
}

#[async_trait]
impl ShowCatalog for MemoryTx {
    async fn find_show(&mut self, show_id: ShowId) -> Result<Option<ShowInfo>, AppError> {
        Ok(self.state()?.shows.get(&show_id).cloned())
    }
}

#[async_trait]
impl SeatAvailabilityStore for MemoryTx {
    async fn lock_and_get_status(
        &mut self,
        show_id: ShowId,
        seat_id: SeatId,
    ) -> Result<Option<SeatRow>, AppError> {
        // the transaction already owns the whole state
        Ok(self.state()?.show_seats.get(&(show_id, seat_id)).cloned())
    }

    async fn lock_seats(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatRow>, AppError> {
        let state = self.state()?;
        let mut ids = seat_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids
            .into_iter()
            .filter_map(|seat_id| state.show_seats.get(&(show_id, seat_id)).cloned())
            .collect())
    }

    async fn bulk_transition(
        &mut self,
        show_id: ShowId,
        seats: &[SeatRow],
        transition: SeatTransition,
        _now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let state = self.state()?;
        for seat in seats {
            match state.show_seats.get(&(show_id, seat.seat_id)) {
                Some(current) if current.version == seat.version => {}
                _ => return Err(version_conflict(show_id)),
            }
        }
        for seat in seats {
            if let Some(row) = state.show_seats.get_mut(&(show_id, seat.seat_id)) {
                row.status = transition.status();
                row.held_by = transition.held_by();
                row.hold_expires_at = transition.hold_expires_at();
                row.version += 1;
            }
        }
        Ok(())
    }

    async fn prices_for_seats(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<HashMap<SeatId, i64>, AppError> {
        let state = self.state()?;
        Ok(seat_ids
            .iter()
            .filter_map(|seat_id| {
                state
                    .show_seats
                    .get(&(show_id, *seat_id))
                    .map(|row| (*seat_id, row.price_cents))
            })
            .collect())
    }

    async fn set_price(
        &mut self,
        show_id: ShowId,
        seat: &SeatRow,
        price_cents: i64,
        _now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let state = self.state()?;
        match state.show_seats.get_mut(&(show_id, seat.seat_id)) {
            Some(row) if row.version == seat.version => {
                row.price_cents = price_cents;
                row.version += 1;
                Ok(())
            }
            _ => Err(version_conflict(show_id)),
        }
    }
}

#[async_trait]
impl HoldLedger for MemoryTx {
    async fn expired_hold_seats(
        &mut self,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, AppError> {
        let state = self.state()?;
        let mut seat_ids: Vec<SeatId> = state
            .holds
            .values()
            .filter(|hold| hold.show_id == show_id && hold.expires_at <= now)
            .map(|hold| hold.seat_id)
            .collect();
        seat_ids.sort_unstable();
        Ok(seat_ids)
    }

    async fn delete_expired_holds(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, AppError> {
        let state = self.state()?;
        let mut freed = Vec::new();
        state.holds.retain(|_, hold| {
            let expired = hold.show_id == show_id
                && seat_ids.contains(&hold.seat_id)
                && hold.expires_at <= now;
            if expired {
                freed.push(hold.seat_id);
            }
            !expired
        });
        freed.sort_unstable();
        Ok(freed)
    }

    async fn create_holds(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Vec<SeatHold>, AppError> {
        let state = self.state()?;
        let expires_at = now + ttl;
        let mut created = Vec::with_capacity(seat_ids.len());

        for seat_id in seat_ids {
            let taken = state
                .holds
                .values()
                .any(|hold| hold.show_id == show_id && hold.seat_id == *seat_id);
            if taken {
                return Err(AppError::Internal(format!(
                    "duplicate hold for show {} seat {}",
                    show_id, seat_id
                )));
            }

            state.next_hold_id += 1;
            let hold = SeatHold {
                id: state.next_hold_id,
                user_id,
                show_id,
                seat_id: *seat_id,
                hold_token: new_hold_token(),
                expires_at,
                created_at: now,
            };
            state.holds.insert(hold.id, hold.clone());
            created.push(hold);
        }
        Ok(created)
    }

    async fn active_holds_for(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatHold>, AppError> {
        let state = self.state()?;
        let mut holds: Vec<SeatHold> = state
            .holds
            .values()
            .filter(|hold| {
                hold.user_id == user_id && hold.show_id == show_id && hold.is_active(now)
            })
            .cloned()
            .collect();
        holds.sort_by_key(|hold| hold.seat_id);
        Ok(holds)
    }

    async fn has_active_hold(
        &mut self,
        show_id: ShowId,
        seat_id: SeatId,
        holder: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let state = self.state()?;
        Ok(state.holds.values().any(|hold| {
            hold.show_id == show_id
                && hold.seat_id == seat_id
                && hold.is_active(now)
                && holder.map_or(true, |user_id| hold.user_id == user_id)
        }))
    }

    async fn hold_seats_of(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
    ) -> Result<Vec<SeatId>, AppError> {
        let state = self.state()?;
        let mut seat_ids: Vec<SeatId> = state
            .holds
            .values()
            .filter(|hold| hold.user_id == user_id && hold.show_id == show_id)
            .map(|hold| hold.seat_id)
            .collect();
        seat_ids.sort_unstable();
        Ok(seat_ids)
    }

    async fn release_holds_for(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, AppError> {
        let state = self.state()?;
        let mut released = Vec::new();
        state.holds.retain(|_, hold| {
            let mine = hold.user_id == user_id
                && hold.show_id == show_id
                && seat_ids.contains(&hold.seat_id);
            if mine {
                released.push(hold.seat_id);
            }
            !mine
        });
        released.sort_unstable();
        Ok(released)
    }
}

#[async_trait]
impl ReservationLedger for MemoryTx {
    async fn create_reservation(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        total_amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        let state = self.state()?;
        state.next_reservation_id += 1;
        let reservation = Reservation {
            id: state.next_reservation_id,
            user_id,
            show_id,
            status: ReservationStatus::Confirmed,
            total_amount_cents,
            payment_ref: None,
            created_at: now,
            updated_at: now,
        };
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn attach_seats(
        &mut self,
        reservation_id: ReservationId,
        show_id: ShowId,
        seats: &[ReservedSeat],
    ) -> Result<(), AppError> {
        let state = self.state()?;
        if !state.reservations.contains_key(&reservation_id) {
            return Err(AppError::Internal(format!(
                "reservation {} does not exist",
                reservation_id
            )));
        }
        for seat in seats {
            if state.reservation_seats.contains_key(&(show_id, seat.seat_id)) {
                return Err(AppError::Internal(format!(
                    "seat {} of show {} is already reserved",
                    seat.seat_id, show_id
                )));
            }
            state
                .reservation_seats
                .insert((show_id, seat.seat_id), (reservation_id, seat.price_cents));
        }
        Ok(())
    }

    async fn find_cancellation_target(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<CancellationTarget>, AppError> {
        let state = self.state()?;
        let Some(reservation) = state.reservations.get(&reservation_id) else {
            return Ok(None);
        };
        let show = state.shows.get(&reservation.show_id).ok_or_else(|| {
            AppError::Internal(format!("show {} of reservation is missing", reservation.show_id))
        })?;
        Ok(Some(CancellationTarget {
            reservation_id,
            user_id: reservation.user_id,
            show_id: reservation.show_id,
            hall_owner_id: show.owner_id,
            show_starts_at: show.starts_at,
        }))
    }

    async fn delete_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<SeatId>, AppError> {
        let state = self.state()?;
        if state.reservations.remove(&reservation_id).is_none() {
            return Ok(Vec::new());
        }
        let mut seat_ids = Vec::new();
        state.reservation_seats.retain(|(_, seat_id), (owner, _)| {
            let attached = *owner == reservation_id;
            if attached {
                seat_ids.push(*seat_id);
            }
            !attached
        });
        Ok(seat_ids)
    }
}

#[async_trait]
impl BookingTx for MemoryTx {
    async fn commit(&mut self) -> Result<(), AppError> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))?;
        *guard = std::mem::take(&mut self.work);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        self.guard.take();
        Ok(())
    }
}
