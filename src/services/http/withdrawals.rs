use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{respond, AppState};
use crate::models::withdrawals::NewWithdrawal;
use crate::services::call;
use crate::services::withdrawals::WithdrawalRequest;

pub async fn request(
    State(state): State<AppState>,
    Json(request): Json<NewWithdrawal>,
) -> impl IntoResponse {
    let result = call(&state.channels.withdrawals, "Withdrawals", |response| {
        WithdrawalRequest::Request { request, response }
    })
    .await;

    respond(StatusCode::CREATED, result)
}

pub async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.withdrawals, "Withdrawals", |response| {
        WithdrawalRequest::ListForUser { user_id, response }
    })
    .await;

    respond(StatusCode::OK, result)
}
