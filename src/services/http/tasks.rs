use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{respond, AppState};
use crate::services::call;
use crate::services::tasks::TaskRequest;

#[derive(Deserialize)]
pub struct TaskFilter {
    user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct TaskAction {
    user_id: String,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> impl IntoResponse {
    let result = call(&state.channels.tasks, "Tasks", |response| TaskRequest::List {
        user_id: filter.user_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn verify(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<TaskAction>,
) -> impl IntoResponse {
    let result = call(&state.channels.tasks, "Tasks", |response| TaskRequest::Verify {
        user_id: req.user_id,
        task_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}

pub async fn claim(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(req): Json<TaskAction>,
) -> impl IntoResponse {
    let result = call(&state.channels.tasks, "Tasks", |response| TaskRequest::Claim {
        user_id: req.user_id,
        task_id,
        response,
    })
    .await;

    respond(StatusCode::OK, result)
}
