use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// What the reservation core needs to know about a scheduled show.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ShowInfo {
    pub id: i64,
    pub hall_id: i64,
    pub owner_id: i64,
    pub starts_at: DateTime<Utc>,
}
