use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::path_param;
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{ReservationDetail, ReservationId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/my-reservations", get(my_reservations))
        .route(
            "/reservations/{id}",
            get(get_reservation).delete(cancel_reservation),
        )
}

#[derive(Debug, Serialize)]
struct ReservationsResponse {
    items: Vec<ReservationDetail>,
}

#[derive(Debug, Serialize)]
struct ReservationResponse {
    item: ReservationDetail,
}

async fn my_reservations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ReservationsResponse>, AppError> {
    let items = state.coordinator.reservations_for(user.user_id).await?;
    Ok(Json(ReservationsResponse { items }))
}

async fn get_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<ReservationId>, PathRejection>,
) -> Result<Json<ReservationResponse>, AppError> {
    let reservation_id = path_param(path)?;
    let item = state
        .coordinator
        .reservation_for(user.user_id, reservation_id)
        .await?;
    Ok(Json(ReservationResponse { item }))
}

// DELETE /reservations/{id}: 403 чужая бронь, 409 показ уже начался
async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    path: Result<Path<ReservationId>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let reservation_id = path_param(path)?;
    state
        .coordinator
        .cancel(reservation_id, user.as_customer())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
