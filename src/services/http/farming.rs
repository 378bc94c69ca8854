use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{respond, AppState};
use crate::models::farming::ConnectionQuality;
use crate::services::call;
use crate::services::farming::FarmingRequest;

#[derive(Deserialize)]
pub struct StartFarming {
    user_id: String,
    device_id: String,
    #[serde(default)]
    connection: ConnectionQuality,
}

#[derive(Deserialize)]
pub struct StopFarming {
    device_id: String,
}

pub async fn start(
    State(state): State<AppState>,
    Json(req): Json<StartFarming>,
) -> impl IntoResponse {
    let result = call(&state.channels.farming, "Farming", |response| {
        FarmingRequest::Start {
            user_id: req.user_id,
            device_id: req.device_id,
            connection: req.connection,
            response,
        }
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn stop(
    State(state): State<AppState>,
    Json(req): Json<StopFarming>,
) -> impl IntoResponse {
    let result = call(&state.channels.farming, "Farming", |response| {
        FarmingRequest::Stop {
            device_id: req.device_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.farming, "Farming", |response| {
        FarmingRequest::Status {
            device_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}
