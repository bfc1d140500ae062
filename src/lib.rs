pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod redis_client;
pub mod services;
pub mod storage;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use clock::{Clock, SystemClock};
use config::{Config, StorageBackend};
use services::coordinator::ReservationCoordinator;
use services::notifications::{BookingEventSink, LogSink, RedisStreamSink};
use storage::memory::ShowSeed;
use storage::{MemoryStorage, PgStorage, Storage};

pub const DEMO_SHOW_ID: models::ShowId = 1;
pub const DEMO_OWNER_ID: models::UserId = 1;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub coordinator: ReservationCoordinator,
    pub config: Config,
    /// Only set for the postgres backend; used by the health check.
    pub db: Option<database::Database>,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let policy = config.booking.policy();

        let (storage, db): (Arc<dyn Storage>, Option<database::Database>) =
            match config.database.backend {
                StorageBackend::Postgres => {
                    let url = config.database.url.as_deref().ok_or_else(|| {
                        anyhow::anyhow!("DATABASE_URL must be set for the postgres backend")
                    })?;
                    let db = database::Database::new(
                        url,
                        config.database.pool_size,
                        policy.lock_timeout,
                    )
                    .await?;
                    info!("Database connected");
                    db.run_migrations().await?;
                    let storage: Arc<dyn Storage> =
                        Arc::new(PgStorage::new(db.clone(), policy.lock_timeout));
                    (storage, Some(db))
                }
                StorageBackend::Memory => {
                    let memory = MemoryStorage::new();
                    // Демо-показ через неделю, чтобы было что бронировать локально
                    let starts_at = chrono::Utc::now() + chrono::Duration::days(7);
                    memory
                        .seed_show(ShowSeed::grid(
                            DEMO_SHOW_ID,
                            DEMO_OWNER_ID,
                            starts_at,
                            5,
                            10,
                            1_000,
                        ))
                        .await;
                    info!("In-memory storage seeded with demo show {}", DEMO_SHOW_ID);
                    let storage: Arc<dyn Storage> = Arc::new(memory);
                    (storage, None)
                }
            };

        let events: Arc<dyn BookingEventSink> = match &config.redis.url {
            Some(url) => {
                let redis = redis_client::RedisClient::new(url).await?;
                Arc::new(RedisStreamSink::new(redis, config.redis.events_stream.clone()))
            }
            None => {
                warn!("REDIS_URL is not set, booking events are only logged");
                Arc::new(LogSink)
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let coordinator = ReservationCoordinator::new(storage, clock, events, policy);

        Ok(Arc::new(Self {
            coordinator,
            config,
            db,
        }))
    }

    pub fn from_parts(coordinator: ReservationCoordinator, config: Config) -> Arc<Self> {
        Arc::new(Self {
            coordinator,
            config,
            db: None,
        })
    }
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    if let Some(db) = &state.db {
        if let Err(e) = db.ping().await {
            tracing::error!("health check failed: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "DB UNAVAILABLE");
        }
    }
    (StatusCode::OK, "OK")
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat reservations API v1.0" }))
        .route("/health", get(health))
        .merge(controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
