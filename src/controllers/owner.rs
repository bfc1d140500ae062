//! Hall owner endpoints. The token must carry the `owner` role; ownership of
//! the particular show is checked by the coordinator.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{delete, patch},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use super::{path_param, validated};
use crate::error::AppError;
use crate::middleware::OwnerUser;
use crate::models::{ReservationId, SeatId, ShowId};
use crate::services::coordinator::SeatPrice;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/owner/reservations/{id}", delete(cancel_reservation))
        .route("/owner/shows/{show_id}/seats/{seat_id}", patch(reprice_seat))
}

#[derive(Debug, Deserialize, Validate)]
struct RepriceRequest {
    #[validate(range(min = 0, message = "price_cents must not be negative"))]
    price_cents: i64,
}

async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    owner: OwnerUser,
    path: Result<Path<ReservationId>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let reservation_id = path_param(path)?;
    state
        .coordinator
        .cancel(reservation_id, owner.actor())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reprice_seat(
    State(state): State<Arc<AppState>>,
    owner: OwnerUser,
    path: Result<Path<(ShowId, SeatId)>, PathRejection>,
    body: Result<Json<RepriceRequest>, JsonRejection>,
) -> Result<Json<SeatPrice>, AppError> {
    let (show_id, seat_id) = path_param(path)?;
    let req = validated(body)?;
    let price = state
        .coordinator
        .reprice_seat(owner.user_id, show_id, seat_id, req.price_cents)
        .await?;
    Ok(Json(price))
}
