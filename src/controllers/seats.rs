use axum::{
    extract::{rejection::PathRejection, Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::path_param;
use crate::error::AppError;
use crate::models::{SeatMapEntry, ShowId};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/shows/{id}/seats", get(get_seat_map))
}

#[derive(Debug, Serialize)]
struct SeatMapResponse {
    items: Vec<SeatMapEntry>,
}

// GET /shows/{id}/seats, без авторизации
async fn get_seat_map(
    State(state): State<Arc<AppState>>,
    path: Result<Path<ShowId>, PathRejection>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let show_id = path_param(path)?;
    let items = state.coordinator.seat_map(show_id).await?;
    Ok(Json(SeatMapResponse { items }))
}
