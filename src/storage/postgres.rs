//! Postgres backend.
//!
//! Seat decisions are serialized with `SELECT … FOR UPDATE` on the
//! `show_seats` row; every transaction sets `lock_timeout` so a stuck lock
//! surfaces as [`AppError::LockUnavailable`] instead of hanging the request.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, Postgres, Transaction};
use std::collections::HashMap;

use super::availability::version_conflict;
use super::holds::new_hold_token;
use super::{
    BookingTx, HoldLedger, ReservationLedger, SeatAvailabilityStore, SeatTransition, ShowCatalog,
    Storage,
};
use crate::database::Database;
use crate::error::AppError;
use crate::models::{
    CancellationTarget, Reservation, ReservationDetail, ReservationId, ReservedSeat,
    ReservedSeatDetail, SeatHold, SeatId, SeatMapEntry, SeatRow, ShowId, ShowInfo, UserId,
};

#[derive(sqlx::FromRow)]
struct SeatStatusRow {
    seat_id: i64,
    status: String,
    price_cents: i64,
    version: i64,
    held_by: Option<i64>,
    hold_expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SeatStatusRow> for SeatRow {
    type Error = AppError;

    fn try_from(row: SeatStatusRow) -> Result<Self, Self::Error> {
        Ok(SeatRow {
            seat_id: row.seat_id,
            status: row.status.parse().map_err(AppError::Internal)?,
            price_cents: row.price_cents,
            version: row.version,
            held_by: row.held_by,
            hold_expires_at: row.hold_expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: i64,
    user_id: i64,
    show_id: i64,
    status: String,
    total_amount_cents: i64,
    payment_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = AppError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            user_id: row.user_id,
            show_id: row.show_id,
            status: row.status.parse().map_err(AppError::Internal)?,
            total_amount_cents: row.total_amount_cents,
            payment_ref: row.payment_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReservationWithShowRow {
    #[sqlx(flatten)]
    reservation: ReservationRow,
    show_starts_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReservedSeatRow {
    reservation_id: i64,
    seat_id: i64,
    row_label: String,
    seat_number: i32,
    price_cents: i64,
}

const SEAT_COLUMNS: &str = "seat_id, status, price_cents, version, held_by, hold_expires_at";

const HOLD_COLUMNS: &str = "id, user_id, show_id, seat_id, hold_token, expires_at, created_at";

const RESERVATION_COLUMNS: &str =
    "r.id, r.user_id, r.show_id, r.status, r.total_amount_cents, r.payment_ref, r.created_at, r.updated_at";

#[derive(Clone)]
pub struct PgStorage {
    db: Database,
    lock_timeout_ms: u64,
}

impl PgStorage {
    pub fn new(db: Database, lock_timeout: std::time::Duration) -> Self {
        Self {
            db,
            lock_timeout_ms: lock_timeout.as_millis().max(1) as u64,
        }
    }

    async fn load_details(
        &self,
        rows: Vec<ReservationWithShowRow>,
    ) -> Result<Vec<ReservationDetail>, AppError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = rows.iter().map(|row| row.reservation.id).collect();

        let seat_rows: Vec<ReservedSeatRow> = sqlx::query_as(
            r#"
            SELECT rs.reservation_id, rs.seat_id, s.row_label, s.seat_number, rs.price_cents
            FROM reservation_seats rs
            JOIN seats s ON s.id = rs.seat_id
            WHERE rs.reservation_id = ANY($1)
            ORDER BY rs.reservation_id, rs.seat_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.db.pool)
        .await?;

        let mut seats: HashMap<i64, Vec<ReservedSeatDetail>> = HashMap::new();
        for row in seat_rows {
            seats.entry(row.reservation_id).or_default().push(ReservedSeatDetail {
                seat_id: row.seat_id,
                row_label: row.row_label,
                seat_number: row.seat_number,
                price_cents: row.price_cents,
            });
        }

        rows.into_iter()
            .map(|row| {
                let reservation = Reservation::try_from(row.reservation)?;
                Ok(ReservationDetail {
                    seats: seats.remove(&reservation.id).unwrap_or_default(),
                    show_starts_at: row.show_starts_at,
                    reservation,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> Result<Box<dyn BookingTx>, AppError> {
        let mut tx = self.db.pool.begin().await?;
        // SET LOCAL does not take bind parameters
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx: Some(tx) }))
    }

    async fn seat_map(
        &self,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<SeatMapEntry>>, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM shows WHERE id = $1)")
            .bind(show_id)
            .fetch_one(&self.db.pool)
            .await?;
        if !exists {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, (i64, String, i32, String)>(
            r#"
            SELECT ss.seat_id, s.row_label, s.seat_number,
                   CASE WHEN ss.status = 'HELD' AND ss.hold_expires_at <= $2
                        THEN 'FREE' ELSE ss.status END AS status
            FROM show_seats ss
            JOIN seats s ON s.id = ss.seat_id
            WHERE ss.show_id = $1
            ORDER BY s.row_label, s.seat_number
            "#,
        )
        .bind(show_id)
        .bind(now)
        .fetch_all(&self.db.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(|(seat_id, row_label, seat_number, status)| {
                Ok(SeatMapEntry {
                    seat_id,
                    row_label,
                    seat_number,
                    status: status.parse().map_err(AppError::Internal)?,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok(Some(entries))
    }

    async fn reservations_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<ReservationDetail>, AppError> {
        let rows: Vec<ReservationWithShowRow> = sqlx::query_as(&format!(
            "SELECT {}, sh.starts_at AS show_starts_at
             FROM reservations r
             JOIN shows sh ON sh.id = r.show_id
             WHERE r.user_id = $1
             ORDER BY r.created_at DESC, r.id DESC",
            RESERVATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.db.pool)
        .await?;

        self.load_details(rows).await
    }

    async fn reservation_detail(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<ReservationDetail>, AppError> {
        let row: Option<ReservationWithShowRow> = sqlx::query_as(&format!(
            "SELECT {}, sh.starts_at AS show_starts_at
             FROM reservations r
             JOIN shows sh ON sh.id = r.show_id
             WHERE r.id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_optional(&self.db.pool)
        .await?;

        match row {
            Some(row) => Ok(self.load_details(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, AppError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))
    }
}

#[async_trait]
impl ShowCatalog for PgTx {
    async fn find_show(&mut self, show_id: ShowId) -> Result<Option<ShowInfo>, AppError> {
        let show = sqlx::query_as::<_, ShowInfo>(
            r#"
            SELECT sh.id, sh.hall_id, h.owner_id, sh.starts_at
            FROM shows sh
            JOIN halls h ON h.id = sh.hall_id
            WHERE sh.id = $1
            "#,
        )
        .bind(show_id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(show)
    }
}

#[async_trait]
impl SeatAvailabilityStore for PgTx {
    async fn lock_and_get_status(
        &mut self,
        show_id: ShowId,
        seat_id: SeatId,
    ) -> Result<Option<SeatRow>, AppError> {
        let row: Option<SeatStatusRow> = sqlx::query_as(&format!(
            "SELECT {} FROM show_seats WHERE show_id = $1 AND seat_id = $2 FOR UPDATE",
            SEAT_COLUMNS
        ))
        .bind(show_id)
        .bind(seat_id)
        .fetch_optional(self.conn()?)
        .await?;
        row.map(SeatRow::try_from).transpose()
    }

    async fn lock_seats(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatRow>, AppError> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<SeatStatusRow> = sqlx::query_as(&format!(
            "SELECT {} FROM show_seats
             WHERE show_id = $1 AND seat_id = ANY($2)
             ORDER BY seat_id
             FOR UPDATE",
            SEAT_COLUMNS
        ))
        .bind(show_id)
        .bind(seat_ids)
        .fetch_all(self.conn()?)
        .await?;
        rows.into_iter().map(SeatRow::try_from).collect()
    }

    async fn bulk_transition(
        &mut self,
        show_id: ShowId,
        seats: &[SeatRow],
        transition: SeatTransition,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if seats.is_empty() {
            return Ok(());
        }
        let seat_ids: Vec<i64> = seats.iter().map(|seat| seat.seat_id).collect();
        let versions: Vec<i64> = seats.iter().map(|seat| seat.version).collect();

        let result = sqlx::query(
            r#"
            UPDATE show_seats AS ss
            SET status = $2,
                held_by = $3,
                hold_expires_at = $4,
                version = ss.version + 1,
                updated_at = $5
            FROM UNNEST($6::BIGINT[], $7::BIGINT[]) AS v(seat_id, version)
            WHERE ss.show_id = $1
              AND ss.seat_id = v.seat_id
              AND ss.version = v.version
            "#,
        )
        .bind(show_id)
        .bind(transition.status().as_str())
        .bind(transition.held_by())
        .bind(transition.hold_expires_at())
        .bind(now)
        .bind(&seat_ids)
        .bind(&versions)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() != seats.len() as u64 {
            return Err(version_conflict(show_id));
        }
        Ok(())
    }

    async fn prices_for_seats(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<HashMap<SeatId, i64>, AppError> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT seat_id, price_cents FROM show_seats WHERE show_id = $1 AND seat_id = ANY($2)",
        )
        .bind(show_id)
        .bind(seat_ids)
        .fetch_all(self.conn()?)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn set_price(
        &mut self,
        show_id: ShowId,
        seat: &SeatRow,
        price_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE show_seats
            SET price_cents = $3, version = version + 1, updated_at = $4
            WHERE show_id = $1 AND seat_id = $2 AND version = $5
            "#,
        )
        .bind(show_id)
        .bind(seat.seat_id)
        .bind(price_cents)
        .bind(now)
        .bind(seat.version)
        .execute(self.conn()?)
        .await?;

        if result.rows_affected() != 1 {
            return Err(version_conflict(show_id));
        }
        Ok(())
    }
}

#[async_trait]
impl HoldLedger for PgTx {
    async fn expired_hold_seats(
        &mut self,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, AppError> {
        let seat_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT seat_id FROM seat_holds WHERE show_id = $1 AND expires_at <= $2 ORDER BY seat_id",
        )
        .bind(show_id)
        .bind(now)
        .fetch_all(self.conn()?)
        .await?;
        Ok(seat_ids)
    }

    async fn delete_expired_holds(
        &mut self,
        show_id: ShowId,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, AppError> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut freed: Vec<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM seat_holds
            WHERE show_id = $1 AND seat_id = ANY($2) AND expires_at <= $3
            RETURNING seat_id
            "#,
        )
        .bind(show_id)
        .bind(seat_ids)
        .bind(now)
        .fetch_all(self.conn()?)
        .await?;
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
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let tokens: Vec<String> = seat_ids.iter().map(|_| new_hold_token()).collect();

        let mut holds: Vec<SeatHold> = sqlx::query_as(&format!(
            "INSERT INTO seat_holds (user_id, show_id, seat_id, hold_token, expires_at, created_at)
             SELECT $1, $2, h.seat_id, h.hold_token, $3, $4
             FROM UNNEST($5::BIGINT[], $6::TEXT[]) AS h(seat_id, hold_token)
             RETURNING {}",
            HOLD_COLUMNS
        ))
        .bind(user_id)
        .bind(show_id)
        .bind(now + ttl)
        .bind(now)
        .bind(seat_ids)
        .bind(&tokens)
        .fetch_all(self.conn()?)
        .await?;
        holds.sort_by_key(|hold| hold.seat_id);
        Ok(holds)
    }

    async fn active_holds_for(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatHold>, AppError> {
        let holds = sqlx::query_as::<_, SeatHold>(&format!(
            "SELECT {} FROM seat_holds
             WHERE user_id = $1 AND show_id = $2 AND expires_at > $3
             ORDER BY seat_id",
            HOLD_COLUMNS
        ))
        .bind(user_id)
        .bind(show_id)
        .bind(now)
        .fetch_all(self.conn()?)
        .await?;
        Ok(holds)
    }

    async fn has_active_hold(
        &mut self,
        show_id: ShowId,
        seat_id: SeatId,
        holder: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM seat_holds
            WHERE show_id = $1 AND seat_id = $2 AND expires_at > $3
              AND ($4::BIGINT IS NULL OR user_id = $4)
            "#,
        )
        .bind(show_id)
        .bind(seat_id)
        .bind(now)
        .bind(holder)
        .fetch_one(self.conn()?)
        .await?;
        Ok(count > 0)
    }

    async fn hold_seats_of(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
    ) -> Result<Vec<SeatId>, AppError> {
        let seat_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT seat_id FROM seat_holds WHERE user_id = $1 AND show_id = $2 ORDER BY seat_id",
        )
        .bind(user_id)
        .bind(show_id)
        .fetch_all(self.conn()?)
        .await?;
        Ok(seat_ids)
    }

    async fn release_holds_for(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, AppError> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut released: Vec<i64> = sqlx::query_scalar(
            r#"
            DELETE FROM seat_holds
            WHERE user_id = $1 AND show_id = $2 AND seat_id = ANY($3)
            RETURNING seat_id
            "#,
        )
        .bind(user_id)
        .bind(show_id)
        .bind(seat_ids)
        .fetch_all(self.conn()?)
        .await?;
        released.sort_unstable();
        Ok(released)
    }
}

#[async_trait]
impl ReservationLedger for PgTx {
    async fn create_reservation(
        &mut self,
        user_id: UserId,
        show_id: ShowId,
        total_amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, AppError> {
        let row: ReservationRow = sqlx::query_as(
            r#"
            INSERT INTO reservations AS r (user_id, show_id, status, total_amount_cents, created_at, updated_at)
            VALUES ($1, $2, 'CONFIRMED', $3, $4, $4)
            RETURNING r.id, r.user_id, r.show_id, r.status, r.total_amount_cents,
                      r.payment_ref, r.created_at, r.updated_at
            "#,
        )
        .bind(user_id)
        .bind(show_id)
        .bind(total_amount_cents)
        .bind(now)
        .fetch_one(self.conn()?)
        .await?;
        Reservation::try_from(row)
    }

    async fn attach_seats(
        &mut self,
        reservation_id: ReservationId,
        show_id: ShowId,
        seats: &[ReservedSeat],
    ) -> Result<(), AppError> {
        if seats.is_empty() {
            return Ok(());
        }
        let seat_ids: Vec<i64> = seats.iter().map(|seat| seat.seat_id).collect();
        let prices: Vec<i64> = seats.iter().map(|seat| seat.price_cents).collect();

        sqlx::query(
            r#"
            INSERT INTO reservation_seats (reservation_id, show_id, seat_id, price_cents)
            SELECT $1, $2, s.seat_id, s.price_cents
            FROM UNNEST($3::BIGINT[], $4::BIGINT[]) AS s(seat_id, price_cents)
            "#,
        )
        .bind(reservation_id)
        .bind(show_id)
        .bind(&seat_ids)
        .bind(&prices)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn find_cancellation_target(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<CancellationTarget>, AppError> {
        let target = sqlx::query_as::<_, CancellationTarget>(
            r#"
            SELECT r.id AS reservation_id, r.user_id, r.show_id,
                   h.owner_id AS hall_owner_id, sh.starts_at AS show_starts_at
            FROM reservations r
            JOIN shows sh ON sh.id = r.show_id
            JOIN halls h ON h.id = sh.hall_id
            WHERE r.id = $1
            FOR UPDATE OF r
            "#,
        )
        .bind(reservation_id)
        .fetch_optional(self.conn()?)
        .await?;
        Ok(target)
    }

    async fn delete_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Vec<SeatId>, AppError> {
        let seat_ids: Vec<i64> = sqlx::query_scalar(
            "DELETE FROM reservation_seats WHERE reservation_id = $1 RETURNING seat_id",
        )
        .bind(reservation_id)
        .fetch_all(self.conn()?)
        .await?;

        sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(reservation_id)
            .execute(self.conn()?)
            .await?;
        Ok(seat_ids)
    }
}

#[async_trait]
impl BookingTx for PgTx {
    async fn commit(&mut self) -> Result<(), AppError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
