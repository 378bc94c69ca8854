use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

use super::{respond, AppState};
use crate::models::tiers::Tier;
use crate::models::vip::NewVipRequest;
use crate::services::call;
use crate::services::vip::VipRequestMessage;

/// Sent once the payment provider reports a successful Stars charge.
#[derive(Deserialize)]
pub struct StarsPayment {
    user_id: String,
    tier: Tier,
    charge_id: String,
    stars: u64,
}

pub async fn confirm_stars_payment(
    State(state): State<AppState>,
    Json(payment): Json<StarsPayment>,
) -> impl IntoResponse {
    let result = call(&state.channels.vip, "VIP", |response| {
        VipRequestMessage::ConfirmStarsPayment {
            user_id: payment.user_id,
            tier: payment.tier,
            charge_id: payment.charge_id,
            stars: payment.stars,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn submit_request(
    State(state): State<AppState>,
    Json(request): Json<NewVipRequest>,
) -> impl IntoResponse {
    let result = call(&state.channels.vip, "VIP", |response| {
        VipRequestMessage::Submit { request, response }
    })
    .await;

    respond(StatusCode::CREATED, result)
}
