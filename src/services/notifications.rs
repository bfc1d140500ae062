//! Publication of `BookingConfirmedEvent` after a confirmation commits.
//!
//! Delivery is fire-and-forget: the HTTP response never waits on it and a
//! failed publish is only logged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Reservation, ReservationId, ReservedSeat, ShowId, UserId};
use crate::redis_client::RedisClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmedEvent {
    pub event_id: Uuid,
    pub reservation_id: ReservationId,
    pub user_id: UserId,
    pub show_id: ShowId,
    pub seats: Vec<ReservedSeat>,
    pub total_amount_cents: i64,
    pub confirmed_at: DateTime<Utc>,
}

impl BookingConfirmedEvent {
    pub fn new(reservation: &Reservation, seats: Vec<ReservedSeat>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            reservation_id: reservation.id,
            user_id: reservation.user_id,
            show_id: reservation.show_id,
            seats,
            total_amount_cents: reservation.total_amount_cents,
            confirmed_at: reservation.created_at,
        }
    }
}

#[async_trait]
pub trait BookingEventSink: Send + Sync {
    async fn publish(&self, event: &BookingConfirmedEvent) -> anyhow::Result<()>;
}

/// Appends each event to a redis stream as a JSON `payload` field.
pub struct RedisStreamSink {
    redis: RedisClient,
    stream: String,
}

impl RedisStreamSink {
    pub fn new(redis: RedisClient, stream: impl Into<String>) -> Self {
        Self {
            redis,
            stream: stream.into(),
        }
    }
}

#[async_trait]
impl BookingEventSink for RedisStreamSink {
    async fn publish(&self, event: &BookingConfirmedEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.stream)
            .arg("*")
            .arg("reservation_id")
            .arg(event.reservation_id)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        info!(
            "booking event for reservation {} appended to {} as {}",
            event.reservation_id, self.stream, entry_id
        );
        Ok(())
    }
}

/// Used when no broker is configured.
pub struct LogSink;

#[async_trait]
impl BookingEventSink for LogSink {
    async fn publish(&self, event: &BookingConfirmedEvent) -> anyhow::Result<()> {
        info!(
            "booking confirmed: reservation {} user {} show {} seats {} total {}",
            event.reservation_id,
            event.user_id,
            event.show_id,
            event.seats.len(),
            event.total_amount_cents
        );
        Ok(())
    }
}

pub fn publish_in_background(sink: Arc<dyn BookingEventSink>, event: BookingConfirmedEvent) {
    tokio::spawn(async move {
        if let Err(e) = sink.publish(&event).await {
            warn!(
                "failed to publish booking event for reservation {}: {:?}",
                event.reservation_id, e
            );
        }
    });
}
