use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{SeatId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeatStatus {
    Free,
    Held,
    Reserved,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Free => "FREE",
            SeatStatus::Held => "HELD",
            SeatStatus::Reserved => "RESERVED",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(SeatStatus::Free),
            "HELD" => Ok(SeatStatus::Held),
            "RESERVED" => Ok(SeatStatus::Reserved),
            other => Err(format!("unknown seat status '{}'", other)),
        }
    }
}

/// One `show_seats` row as seen under its row lock.
///
/// `held_by` and `hold_expires_at` are set exactly when `status` is `Held`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatRow {
    pub seat_id: SeatId,
    pub status: SeatStatus,
    pub price_cents: i64,
    pub version: i64,
    pub held_by: Option<UserId>,
    pub hold_expires_at: Option<DateTime<Utc>>,
}

impl SeatRow {
    pub fn is_free(&self) -> bool {
        self.status == SeatStatus::Free
    }

    /// Held by `user_id` with a hold that is still live at `now`.
    pub fn is_held_by(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Held
            && self.held_by == Some(user_id)
            && self.hold_expires_at.is_some_and(|expires_at| expires_at > now)
    }
}

/// Public seat map line for `GET /shows/{id}/seats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMapEntry {
    pub seat_id: SeatId,
    pub row_label: String,
    pub seat_number: i32,
    pub status: SeatStatus,
}
