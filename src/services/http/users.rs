use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{respond, AppState};
use crate::models::users::NewUser;
use crate::services::call;
use crate::services::referrals::ReferralRequest;
use crate::services::users::UserRequest;

pub async fn sign_in(
    State(state): State<AppState>,
    Json(identity): Json<NewUser>,
) -> impl IntoResponse {
    let result = call(&state.channels.users, "Users", |response| {
        UserRequest::SignIn { identity, response }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.users, "Users", |response| UserRequest::GetUser {
        id: user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn list_referrals(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.referrals, "Referrals", |response| {
        ReferralRequest::ListReferrals {
            referrer_id: user_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}
