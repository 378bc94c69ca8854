use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{respond, AppState};
use crate::services::call;
use crate::services::rewards::RewardRequest;

#[derive(Deserialize)]
pub struct ClaimReward {
    user_id: String,
    day: u8,
}

pub async fn calendar(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.rewards, "Rewards", |response| {
        RewardRequest::Calendar { user_id, response }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimReward>,
) -> impl IntoResponse {
    let result = call(&state.channels.rewards, "Rewards", |response| {
        RewardRequest::Claim {
            user_id: req.user_id,
            day: req.day,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}
