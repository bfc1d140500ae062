use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{path_param, seats_unavailable, validated};
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{SeatId, ShowId};
use crate::services::coordinator::{ConfirmOutcome, HoldOutcome};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shows/{id}/hold", post(hold_seats).delete(release_holds))
        .route("/shows/{id}/confirm", post(confirm))
}

#[derive(Debug, Deserialize, Validate)]
struct HoldRequest {
    #[validate(length(min = 1, message = "seat_ids must not be empty"))]
    seat_ids: Vec<SeatId>,
}

#[derive(Debug, Serialize)]
struct ReleaseResponse {
    released: usize,
}

// POST /shows/{id}/hold
async fn hold_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<ShowId>, PathRejection>,
    body: Result<Json<HoldRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let show_id = path_param(path)?;
    let req = validated(body)?;

    match state
        .coordinator
        .hold_seats(user.user_id, show_id, &req.seat_ids)
        .await?
    {
        HoldOutcome::Held(receipt) => Ok((StatusCode::CREATED, Json(receipt)).into_response()),
        HoldOutcome::Unavailable(seat_ids) => Ok(seats_unavailable(seat_ids)),
    }
}

// DELETE /shows/{id}/hold - идемпотентно, повторный вызов вернёт 0
async fn release_holds(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<ShowId>, PathRejection>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let show_id = path_param(path)?;
    let released = state
        .coordinator
        .release_holds(user.user_id, show_id)
        .await?;
    Ok(Json(ReleaseResponse { released }))
}

// POST /shows/{id}/confirm
async fn confirm(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<ShowId>, PathRejection>,
) -> Result<Response, AppError> {
    let show_id = path_param(path)?;
    match state.coordinator.confirm(user.user_id, show_id).await? {
        ConfirmOutcome::Confirmed(receipt) => {
            Ok((StatusCode::CREATED, Json(receipt)).into_response())
        }
        ConfirmOutcome::Unavailable(seat_ids) => Ok(seats_unavailable(seat_ids)),
    }
}
