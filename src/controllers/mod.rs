pub mod holds;
pub mod owner;
pub mod reservations;
pub mod seats;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::error::AppError;
use crate::models::SeatId;
use crate::AppState;

pub fn routes() -> axum::Router<Arc<AppState>> {
    axum::Router::new()
        .merge(seats::routes())
        .merge(holds::routes())
        .merge(reservations::routes())
        .merge(owner::routes())
}

/// Unwraps a JSON body and runs its `validator` rules; malformed or invalid
/// bodies become a 400.
pub(crate) fn validated<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError>
where
    T: DeserializeOwned + Validate,
{
    let Json(value) = body.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    value
        .validate()
        .map_err(|errors| AppError::Validation(errors.to_string()))?;
    Ok(value)
}

/// Same for path parameters, so `/shows/abc/hold` answers with the usual
/// `{"error"}` body instead of axum's plain text.
pub(crate) fn path_param<T>(path: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    let Path(value) = path.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    Ok(value)
}

pub(crate) fn seats_unavailable(seat_ids: Vec<SeatId>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "seats unavailable", "unavailable": seat_ids })),
    )
        .into_response()
}
