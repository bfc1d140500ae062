use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use seat_reservations::{
    app,
    clock::ManualClock,
    config::Config,
    middleware::{encode_token, Role},
    services::coordinator::{BookingPolicy, ReservationCoordinator},
    services::notifications::LogSink,
    storage::memory::{MemoryStorage, ShowSeed},
    AppState,
};

const SECRET: &str = "http-test-secret";
const SHOW: i64 = 100;
const OWNER: i64 = 50;
const ALICE: i64 = 1;
const BOB: i64 = 2;

struct TestApp {
    router: Router,
    clock: Arc<ManualClock>,
}

fn config() -> Config {
    Config::from_lookup(|key| match key {
        "STORAGE_BACKEND" => Some("memory".to_string()),
        "JWT_SECRET" => Some(SECRET.to_string()),
        _ => None,
    })
    .unwrap()
}

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T18:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

async fn test_app() -> TestApp {
    let storage = MemoryStorage::new();
    let mut seed = ShowSeed::grid(SHOW, OWNER, start() + Duration::days(1), 1, 5, 1_000);
    seed.seats[1].price_cents = 1_500;
    storage.seed_show(seed).await;

    let clock = Arc::new(ManualClock::new(start()));
    let coordinator = ReservationCoordinator::new(
        Arc::new(storage),
        clock.clone(),
        Arc::new(LogSink),
        BookingPolicy::default(),
    );
    TestApp {
        router: app(AppState::from_parts(coordinator, config())),
        clock,
    }
}

fn token(user_id: i64, role: Role) -> String {
    encode_token(SECRET, user_id, role, Duration::hours(1)).unwrap()
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    bearer: Option<String>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, value)
}

fn status_of(seat_map: &Value, seat_id: i64) -> String {
    seat_map["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|entry| entry["seat_id"] == seat_id)
        .map(|entry| entry["status"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn health_and_public_seat_map() {
    let app = test_app().await;

    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));

    let (status, body) = send(&app, Method::GET, "/shows/100/seats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(items[0]["row_label"], "A");
    assert_eq!(items[0]["seat_number"], 1);
    assert_eq!(items[0]["status"], "FREE");

    let (status, _) = send(&app, Method::GET, "/shows/999/seats", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn customer_endpoints_require_a_valid_token() {
    let app = test_app().await;

    let (status, _) = send(&app, Method::DELETE, "/shows/100/hold", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = encode_token("other-secret", ALICE, Role::Customer, Duration::hours(1)).unwrap();
    let (status, _) = send(&app, Method::GET, "/my-reservations", Some(forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn hold_confirm_and_list() {
    let app = test_app().await;
    let alice = token(ALICE, Role::Customer);

    let (status, body) = send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(alice.clone()),
        Some(json!({ "seat_ids": [2, 1] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["seat_ids"], json!([1, 2]));
    let expires_at: DateTime<Utc> = serde_json::from_value(body["expires_at"].clone()).unwrap();
    assert_eq!(expires_at, start() + Duration::minutes(5));

    let (status, body) =
        send(&app, Method::POST, "/shows/100/confirm", Some(alice.clone()), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_amount_cents"], 2_500);
    let reservation_id = body["reservation_id"].as_i64().unwrap();

    let (_, seat_map) = send(&app, Method::GET, "/shows/100/seats", None, None).await;
    assert_eq!(status_of(&seat_map, 1), "RESERVED");
    assert_eq!(status_of(&seat_map, 2), "RESERVED");

    let (status, body) = send(&app, Method::GET, "/my-reservations", Some(alice.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], reservation_id);
    assert_eq!(items[0]["status"], "CONFIRMED");
    assert_eq!(items[0]["seats"].as_array().unwrap().len(), 2);

    let uri = format!("/reservations/{}", reservation_id);
    let (status, body) = send(&app, Method::GET, &uri, Some(alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["item"]["total_amount_cents"], 2_500);

    // чужая бронь выглядит как отсутствующая
    let (status, _) = send(&app, Method::GET, &uri, Some(token(BOB, Role::Customer)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn hold_rejects_bad_bodies_and_taken_seats() {
    let app = test_app().await;
    let alice = token(ALICE, Role::Customer);
    let bob = token(BOB, Role::Customer);

    let (status, _) = send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(alice.clone()),
        Some(json!({ "seat_ids": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(alice.clone()),
        Some(json!({ "seats": [1] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/shows/999/hold",
        Some(alice.clone()),
        Some(json!({ "seat_ids": [1] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(alice),
        Some(json!({ "seat_ids": [1] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(bob),
        Some(json!({ "seat_ids": [1, 3] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["unavailable"], json!([1]));

    let (_, seat_map) = send(&app, Method::GET, "/shows/100/seats", None, None).await;
    assert_eq!(status_of(&seat_map, 3), "FREE");
}

#[tokio::test]
async fn release_is_idempotent_and_confirm_needs_holds() {
    let app = test_app().await;
    let alice = token(ALICE, Role::Customer);

    let (status, _) = send(&app, Method::POST, "/shows/100/confirm", Some(alice.clone()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(alice.clone()),
        Some(json!({ "seat_ids": [4, 5] })),
    )
    .await;

    let (status, body) = send(&app, Method::DELETE, "/shows/100/hold", Some(alice.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 2);

    let (status, body) = send(&app, Method::DELETE, "/shows/100/hold", Some(alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 0);
}

#[tokio::test]
async fn expired_hold_shows_free_and_can_be_taken() {
    let app = test_app().await;

    send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(token(ALICE, Role::Customer)),
        Some(json!({ "seat_ids": [1] })),
    )
    .await;
    app.clock.advance(Duration::minutes(6));

    let (_, seat_map) = send(&app, Method::GET, "/shows/100/seats", None, None).await;
    assert_eq!(status_of(&seat_map, 1), "FREE");

    let (status, body) = send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(token(BOB, Role::Customer)),
        Some(json!({ "seat_ids": [1] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["seat_ids"], json!([1]));
}

async fn reserve(app: &TestApp, user_id: i64, seat_ids: Value) -> i64 {
    let bearer = token(user_id, Role::Customer);
    let (status, _) = send(
        app,
        Method::POST,
        "/shows/100/hold",
        Some(bearer.clone()),
        Some(json!({ "seat_ids": seat_ids })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(app, Method::POST, "/shows/100/confirm", Some(bearer), None).await;
    assert_eq!(status, StatusCode::CREATED);
    body["reservation_id"].as_i64().unwrap()
}

#[tokio::test]
async fn customer_cancellation_rules() {
    let app = test_app().await;
    let reservation_id = reserve(&app, ALICE, json!([3])).await;
    let uri = format!("/reservations/{}", reservation_id);

    let (status, _) = send(&app, Method::DELETE, &uri, Some(token(BOB, Role::Customer)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::DELETE, "/reservations/9999", Some(token(ALICE, Role::Customer)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::DELETE, &uri, Some(token(ALICE, Role::Customer)), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (_, seat_map) = send(&app, Method::GET, "/shows/100/seats", None, None).await;
    assert_eq!(status_of(&seat_map, 3), "FREE");
}

#[tokio::test]
async fn cancellation_after_show_start_conflicts() {
    let app = test_app().await;
    let reservation_id = reserve(&app, ALICE, json!([1])).await;
    app.clock.advance(Duration::days(2));

    let uri = format!("/reservations/{}", reservation_id);
    let (status, _) = send(&app, Method::DELETE, &uri, Some(token(ALICE, Role::Customer)), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn owner_endpoints() {
    let app = test_app().await;
    let reservation_id = reserve(&app, ALICE, json!([5])).await;
    let uri = format!("/owner/reservations/{}", reservation_id);

    // роль customer не пускаем
    let (status, _) = send(&app, Method::DELETE, &uri, Some(token(ALICE, Role::Customer)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::DELETE, &uri, Some(token(OWNER + 1, Role::Owner)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, Method::DELETE, &uri, Some(token(OWNER, Role::Owner)), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/owner/shows/100/seats/4",
        Some(token(OWNER, Role::Owner)),
        Some(json!({ "price_cents": 2_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "seat_id": 4, "price_cents": 2_000 }));

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/owner/shows/100/seats/4",
        Some(token(OWNER, Role::Owner)),
        Some(json!({ "price_cents": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::PATCH,
        "/owner/shows/100/seats/4",
        Some(token(OWNER + 1, Role::Owner)),
        Some(json!({ "price_cents": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let bob = token(BOB, Role::Customer);
    send(
        &app,
        Method::POST,
        "/shows/100/hold",
        Some(bob.clone()),
        Some(json!({ "seat_ids": [4] })),
    )
    .await;
    let (status, body) = send(&app, Method::POST, "/shows/100/confirm", Some(bob), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_amount_cents"], 2_000);
}

#[tokio::test]
async fn malformed_path_ids_get_a_json_error() {
    let app = test_app().await;

    let (status, body) = send(&app, Method::GET, "/shows/abc/seats", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &app,
        Method::POST,
        "/shows/abc/hold",
        Some(token(ALICE, Role::Customer)),
        Some(json!({ "seat_ids": [1] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &app,
        Method::PATCH,
        "/owner/shows/100/seats/x",
        Some(token(OWNER, Role::Owner)),
        Some(json!({ "price_cents": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
