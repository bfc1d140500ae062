pub mod seat;
pub mod show;
pub mod hold;
pub mod reservation;

pub use hold::SeatHold;
pub use reservation::{
    CancellationTarget, Reservation, ReservationDetail, ReservationStatus, ReservedSeat,
    ReservedSeatDetail,
};
pub use seat::{SeatMapEntry, SeatRow, SeatStatus};
pub use show::ShowInfo;

pub type ShowId = i64;
pub type SeatId = i64;
pub type UserId = i64;
pub type ReservationId = i64;
