use crate::errors::ApiError;
use crate::models::dtos::heartbeat::{HeartbeatRequestDto, HeartbeatResponseDto};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;

pub async fn heartbeat(
    State(state): State<AppState>,
    payload: Result<Json<HeartbeatRequestDto>, JsonRejection>,
) -> Result<Json<HeartbeatResponseDto>, ApiError> {
    let Json(request) = payload?;
    let response = state.engine.heartbeat(&request).await?;
    Ok(Json(response))
}
