use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use super::{respond, AppState};
use crate::models::tasks::NewTask;
use crate::services::call;
use crate::services::tasks::TaskRequest;
use crate::services::users::UserRequest;
use crate::services::vip::VipRequestMessage;
use crate::services::withdrawals::WithdrawalRequest;

pub async fn create_task(
    State(state): State<AppState>,
    Json(task): Json<NewTask>,
) -> impl IntoResponse {
    let result = call(&state.channels.tasks, "Tasks", |response| {
        TaskRequest::Create { task, response }
    })
    .await;

    respond(StatusCode::CREATED, result)
}

async fn set_banned(state: AppState, user_id: String, banned: bool) -> impl IntoResponse {
    let result = call(&state.channels.users, "Users", |response| {
        UserRequest::SetBanned {
            id: user_id,
            banned,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn ban_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    set_banned(state, user_id, true).await
}

pub async fn unban_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    set_banned(state, user_id, false).await
}

pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.withdrawals, "Withdrawals", |response| {
        WithdrawalRequest::Approve {
            withdrawal_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Path(withdrawal_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.withdrawals, "Withdrawals", |response| {
        WithdrawalRequest::Reject {
            withdrawal_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn list_vip_requests(State(state): State<AppState>) -> impl IntoResponse {
    let result = call(&state.channels.vip, "VIP", |response| {
        VipRequestMessage::List { response }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn approve_vip_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.vip, "VIP", |response| {
        VipRequestMessage::Approve {
            request_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn reject_vip_request(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    let result = call(&state.channels.vip, "VIP", |response| {
        VipRequestMessage::Reject {
            request_id,
            response,
        }
    })
    .await;

    respond(StatusCode::OK, result)
}
