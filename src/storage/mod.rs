//! Persistence for the booking core.
//!
//! Every protocol step runs against one [`BookingTx`]: a transaction handle
//! that owns the seat status rows ([`SeatAvailabilityStore`]), the hold
//! records ([`HoldLedger`]) and the reservations ([`ReservationLedger`]).
//! Dropping a transaction without calling [`BookingTx::commit`] rolls it
//! back and releases every lock it took.

pub mod availability;
pub mod holds;
pub mod memory;
pub mod postgres;
pub mod reservations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{ReservationDetail, ReservationId, SeatMapEntry, ShowId, ShowInfo, UserId};

pub use availability::{SeatAvailabilityStore, SeatTransition};
pub use holds::HoldLedger;
pub use memory::MemoryStorage;
pub use postgres::PgStorage;
pub use reservations::{Actor, ActorKind, ReservationLedger};

/// Read access to the venue catalog, which this core never mutates.
#[async_trait]
pub trait ShowCatalog: Send {
    async fn find_show(&mut self, show_id: ShowId) -> Result<Option<ShowInfo>, AppError>;
}

#[async_trait]
pub trait BookingTx:
    ShowCatalog + SeatAvailabilityStore + HoldLedger + ReservationLedger + Send
{
    async fn commit(&mut self) -> Result<(), AppError>;

    async fn rollback(&mut self) -> Result<(), AppError>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BookingTx>, AppError>;

    /// `None` when the show does not exist. Expired holds that nobody has
    /// reconciled yet are reported as `FREE`.
    async fn seat_map(
        &self,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<SeatMapEntry>>, AppError>;

    async fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationDetail>, AppError>;

    async fn reservation_detail(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationDetail>, AppError>;
}
