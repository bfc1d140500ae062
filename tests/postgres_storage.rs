//! Runs the booking protocols against a real Postgres.
//!
//! `DATABASE_URL=postgres://... cargo test --test postgres_storage -- --ignored`

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use seat_reservations::{
    clock::ManualClock,
    database::Database,
    error::AppError,
    models::{ReservedSeat, SeatStatus},
    services::coordinator::{
        BookingPolicy, ConfirmOutcome, HoldOutcome, ReservationCoordinator,
    },
    services::notifications::LogSink,
    storage::{Actor, PgStorage, SeatTransition, Storage},
};

const OWNER: i64 = 50;
const ALICE: i64 = 1;
const BOB: i64 = 2;

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T18:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// One hall with a single row of four seats, one show a day after `start`.
/// Seat prices are 1000, 1500, 1000, 1000 cents.
async fn seed(pool: &PgPool) -> (i64, Vec<i64>) {
    let hall_id: i64 = sqlx::query_scalar("INSERT INTO halls (owner_id, name) VALUES ($1, 'Hall 1') RETURNING id")
        .bind(OWNER)
        .fetch_one(pool)
        .await
        .unwrap();

    let mut seat_ids = Vec::new();
    for number in 1..=4 {
        let seat_id: i64 = sqlx::query_scalar(
            "INSERT INTO seats (hall_id, row_label, seat_number) VALUES ($1, 'A', $2) RETURNING id",
        )
        .bind(hall_id)
        .bind(number)
        .fetch_one(pool)
        .await
        .unwrap();
        seat_ids.push(seat_id);
    }

    let show_id: i64 = sqlx::query_scalar(
        "INSERT INTO shows (hall_id, title, starts_at) VALUES ($1, 'Premiere', $2) RETURNING id",
    )
    .bind(hall_id)
    .bind(start() + Duration::days(1))
    .fetch_one(pool)
    .await
    .unwrap();

    for (i, seat_id) in seat_ids.iter().enumerate() {
        let price: i64 = if i == 1 { 1_500 } else { 1_000 };
        sqlx::query("INSERT INTO show_seats (show_id, seat_id, price_cents) VALUES ($1, $2, $3)")
            .bind(show_id)
            .bind(seat_id)
            .bind(price)
            .execute(pool)
            .await
            .unwrap();
    }
    (show_id, seat_ids)
}

fn coordinator(pool: PgPool, clock: Arc<ManualClock>) -> (ReservationCoordinator, PgStorage) {
    coordinator_with(pool, clock, std::time::Duration::from_millis(300))
}

fn coordinator_with(
    pool: PgPool,
    clock: Arc<ManualClock>,
    lock_timeout: std::time::Duration,
) -> (ReservationCoordinator, PgStorage) {
    let policy = BookingPolicy {
        hold_ttl: Duration::minutes(5),
        lock_timeout,
    };
    let storage = PgStorage::new(Database::from_pool(pool), policy.lock_timeout);
    let coordinator = ReservationCoordinator::new(
        Arc::new(storage.clone()),
        clock,
        Arc::new(LogSink),
        policy,
    );
    (coordinator, storage)
}

async fn status(pool: &PgPool, show_id: i64, seat_id: i64) -> String {
    sqlx::query_scalar("SELECT status FROM show_seats WHERE show_id = $1 AND seat_id = $2")
        .bind(show_id)
        .bind(seat_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn hold_confirm_cancel_round(pool: PgPool) {
    let (show_id, seats) = seed(&pool).await;
    let clock = Arc::new(ManualClock::new(start()));
    let (coordinator, _) = coordinator(pool.clone(), clock.clone());

    let outcome = coordinator
        .hold_seats(ALICE, show_id, &[seats[1], seats[0]])
        .await
        .unwrap();
    let HoldOutcome::Held(receipt) = outcome else {
        panic!("expected held, got {:?}", outcome);
    };
    assert_eq!(receipt.seat_ids, vec![seats[0], seats[1]]);
    assert_eq!(status(&pool, show_id, seats[0]).await, "HELD");

    let outcome = coordinator.hold_seats(BOB, show_id, &[seats[1], seats[2]]).await.unwrap();
    assert_eq!(outcome, HoldOutcome::Unavailable(vec![seats[1]]));
    assert_eq!(status(&pool, show_id, seats[2]).await, "FREE");

    let outcome = coordinator.confirm(ALICE, show_id).await.unwrap();
    let ConfirmOutcome::Confirmed(receipt) = outcome else {
        panic!("expected confirmed, got {:?}", outcome);
    };
    assert_eq!(receipt.total_amount_cents, 2_500);
    assert_eq!(status(&pool, show_id, seats[1]).await, "RESERVED");

    let holds: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seat_holds WHERE show_id = $1")
        .bind(show_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(holds, 0);

    let mine = coordinator.reservations_for(ALICE).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].seats.len(), 2);
    assert_eq!(mine[0].seats[0].row_label, "A");

    let err = coordinator
        .cancel(receipt.reservation_id, Actor::customer(BOB))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    coordinator
        .cancel(receipt.reservation_id, Actor::owner(OWNER))
        .await
        .unwrap();
    assert_eq!(status(&pool, show_id, seats[0]).await, "FREE");
    assert_eq!(status(&pool, show_id, seats[1]).await, "FREE");
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn expired_holds_are_reconciled_and_reported_free(pool: PgPool) {
    let (show_id, seats) = seed(&pool).await;
    let clock = Arc::new(ManualClock::new(start()));
    let (coordinator, _) = coordinator(pool.clone(), clock.clone());

    coordinator.hold_seats(ALICE, show_id, &[seats[3]]).await.unwrap();
    clock.advance(Duration::minutes(6));

    let map = coordinator.seat_map(show_id).await.unwrap();
    let entry = map.iter().find(|entry| entry.seat_id == seats[3]).unwrap();
    assert_eq!(entry.status, SeatStatus::Free);
    // the read path leaves the row alone
    assert_eq!(status(&pool, show_id, seats[3]).await, "HELD");

    let outcome = coordinator.hold_seats(BOB, show_id, &[seats[3]]).await.unwrap();
    assert!(matches!(outcome, HoldOutcome::Held(_)));

    let holder: Option<i64> =
        sqlx::query_scalar("SELECT held_by FROM show_seats WHERE show_id = $1 AND seat_id = $2")
            .bind(show_id)
            .bind(seats[3])
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(holder, Some(BOB));
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn blocked_row_lock_times_out(pool: PgPool) {
    let (show_id, seats) = seed(&pool).await;
    let clock = Arc::new(ManualClock::new(start()));
    let (coordinator, storage) = coordinator(pool.clone(), clock);

    let mut blocker = storage.begin().await.unwrap();
    blocker.lock_and_get_status(show_id, seats[0]).await.unwrap();

    let err = coordinator.hold_seats(ALICE, show_id, &[seats[0]]).await.unwrap_err();
    assert!(matches!(err, AppError::LockUnavailable));

    blocker.rollback().await.unwrap();
    let outcome = coordinator.hold_seats(ALICE, show_id, &[seats[0]]).await.unwrap();
    assert!(matches!(outcome, HoldOutcome::Held(_)));
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn concurrent_holders_of_one_seat_get_one_winner(pool: PgPool) {
    let (show_id, seats) = seed(&pool).await;
    let clock = Arc::new(ManualClock::new(start()));
    let (coordinator, _) =
        coordinator_with(pool.clone(), clock, std::time::Duration::from_secs(5));

    for round in 0..10i64 {
        let mut tasks = Vec::new();
        for user in 1..=8i64 {
            let coordinator = coordinator.clone();
            let seat = seats[0];
            tasks.push(tokio::spawn(async move {
                let user_id = round * 100 + user;
                let outcome = coordinator.hold_seats(user_id, show_id, &[seat]).await;
                (user_id, outcome)
            }));
        }

        let mut winners = Vec::new();
        for task in tasks {
            let (user_id, outcome) = task.await.unwrap();
            match outcome.unwrap() {
                HoldOutcome::Held(receipt) => {
                    assert_eq!(receipt.seat_ids, vec![seats[0]]);
                    winners.push(user_id);
                }
                HoldOutcome::Unavailable(unavailable) => {
                    assert_eq!(unavailable, vec![seats[0]])
                }
            }
        }
        assert_eq!(winners.len(), 1, "round {} winners {:?}", round, winners);
        assert_eq!(coordinator.release_holds(winners[0], show_id).await.unwrap(), 1);
    }
}

#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn overlapping_seat_sets_in_reverse_order_do_not_deadlock(pool: PgPool) {
    let (show_id, seats) = seed(&pool).await;
    let clock = Arc::new(ManualClock::new(start()));
    let (coordinator, _) =
        coordinator_with(pool.clone(), clock, std::time::Duration::from_secs(5));

    let forward = seats.clone();
    let mut backward = seats.clone();
    backward.reverse();

    for _ in 0..10 {
        let a = {
            let coordinator = coordinator.clone();
            let forward = forward.clone();
            tokio::spawn(async move { coordinator.hold_seats(ALICE, show_id, &forward).await })
        };
        let b = {
            let coordinator = coordinator.clone();
            let backward = backward.clone();
            tokio::spawn(async move { coordinator.hold_seats(BOB, show_id, &backward).await })
        };

        // a deadlock would surface here as LockUnavailable
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        let held = [&a, &b]
            .iter()
            .filter(|outcome| matches!(outcome, HoldOutcome::Held(_)))
            .count();
        assert_eq!(held, 1, "alice {:?}, bob {:?}", a, b);

        coordinator.release_holds(ALICE, show_id).await.unwrap();
        coordinator.release_holds(BOB, show_id).await.unwrap();
    }
}

/// Alice's confirm holds the row lock on her seat when her hold crosses its
/// expiry. Bob's hold on an unrelated seat reconciles that expired hold and
/// has to wait for Alice; it must not deadlock with her.
#[sqlx::test(migrations = "./src/migrations")]
#[ignore = "needs DATABASE_URL pointing at a Postgres server"]
async fn reconciling_hold_waits_for_confirm_in_flight(pool: PgPool) {
    let (show_id, seats) = seed(&pool).await;
    let alice_clock = Arc::new(ManualClock::new(start()));
    let (alice, storage) =
        coordinator_with(pool.clone(), alice_clock, std::time::Duration::from_secs(5));

    let HoldOutcome::Held(receipt) = alice.hold_seats(ALICE, show_id, &[seats[0]]).await.unwrap()
    else {
        panic!("alice could not hold");
    };
    let expires_at = receipt.expires_at;

    // confirm steps, one second before expiry
    let confirm_at = expires_at - Duration::seconds(1);
    let mut alice_tx = storage.begin().await.unwrap();
    let row = alice_tx
        .lock_and_get_status(show_id, seats[0])
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_held_by(ALICE, confirm_at));

    let bob_clock = Arc::new(ManualClock::new(expires_at));
    let (bob, _) = coordinator_with(pool.clone(), bob_clock, std::time::Duration::from_secs(5));
    let unrelated = seats[2];
    let bob_hold =
        tokio::spawn(async move { bob.hold_seats(BOB, show_id, &[unrelated]).await });
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let reservation = alice_tx
        .create_reservation(ALICE, show_id, row.price_cents, confirm_at)
        .await
        .unwrap();
    alice_tx
        .attach_seats(
            reservation.id,
            show_id,
            &[ReservedSeat {
                seat_id: seats[0],
                price_cents: row.price_cents,
            }],
        )
        .await
        .unwrap();
    alice_tx
        .bulk_transition(show_id, &[row], SeatTransition::Reserved, confirm_at)
        .await
        .unwrap();
    let released = alice_tx
        .release_holds_for(ALICE, show_id, &[seats[0]])
        .await
        .unwrap();
    assert_eq!(released, vec![seats[0]]);
    alice_tx.commit().await.unwrap();

    let outcome = bob_hold.await.unwrap().unwrap();
    assert!(matches!(outcome, HoldOutcome::Held(_)), "bob got {:?}", outcome);
    assert_eq!(status(&pool, show_id, seats[0]).await, "RESERVED");
    assert_eq!(status(&pool, show_id, unrelated).await, "HELD");
}
