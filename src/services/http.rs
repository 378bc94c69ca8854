use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::farming::FarmingRequest;
use super::referrals::ReferralRequest;
use super::rewards::RewardRequest;
use super::tasks::TaskRequest;
use super::users::UserRequest;
use super::vip::VipRequestMessage;
use super::withdrawals::WithdrawalRequest;
use super::ServiceError;
use crate::errors::{EconomyError, Severity};
use crate::settings;

mod admin;
mod farming;
mod rewards;
mod tasks;
mod users;
mod vip;
mod withdrawals;

const ADMIN_KEY_HEADER: &str = "x-admin-key";
const PAYMENT_SECRET_HEADER: &str = "x-payment-secret";

#[derive(Clone)]
pub struct Channels {
    pub farming: mpsc::Sender<FarmingRequest>,
    pub referrals: mpsc::Sender<ReferralRequest>,
    pub rewards: mpsc::Sender<RewardRequest>,
    pub tasks: mpsc::Sender<TaskRequest>,
    pub users: mpsc::Sender<UserRequest>,
    pub vip: mpsc::Sender<VipRequestMessage>,
    pub withdrawals: mpsc::Sender<WithdrawalRequest>,
}

#[derive(Clone)]
struct AppState {
    channels: Channels,
    admin_api_key: Option<String>,
    payment_secret: Option<String>,
}

fn economy_status(error: &EconomyError) -> StatusCode {
    match error {
        e if e.is_not_found() => StatusCode::NOT_FOUND,
        EconomyError::UserBanned(_) => StatusCode::FORBIDDEN,
        EconomyError::CooldownActive { .. } | EconomyError::DailyQuotaExceeded { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        EconomyError::PendingSync(_) => StatusCode::SERVICE_UNAVAILABLE,
        EconomyError::SessionAlreadyActive(_)
        | EconomyError::SessionNotActive(_)
        | EconomyError::InvalidTransition { .. }
        | EconomyError::TaskAlreadyCompleted(_) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_response(error: ServiceError) -> (StatusCode, Json<Value>) {
    match error {
        ServiceError::Economy(e) => {
            match e.severity() {
                Severity::High => log::warn!("Rejected request: {}", e),
                _ => log::debug!("Rejected request: {}", e),
            }
            (
                economy_status(&e),
                Json(json!({"description": e.to_string(), "retryable": e.is_retryable()})),
            )
        }
        e => {
            log::error!("Request failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"description": "Internal server error."})),
            )
        }
    }
}

/// Serializes a service result, mapping rule violations to 4xx and everything else to 500.
fn respond<T: Serialize>(
    success: StatusCode,
    result: Result<T, ServiceError>,
) -> (StatusCode, Json<Value>) {
    let body = result.and_then(|body| {
        serde_json::to_value(body).map_err(|e| ServiceError::Internal(e.to_string()))
    });

    match body {
        Ok(body) => (success, Json(body)),
        Err(e) => error_response(e),
    }
}

/// Status to refuse a keyed route with. A route whose key is not configured stays closed.
fn key_rejection(expected: Option<&str>, presented: Option<&str>) -> Option<StatusCode> {
    match expected {
        None => Some(StatusCode::SERVICE_UNAVAILABLE),
        Some(expected) if presented == Some(expected) => None,
        Some(_) => Some(StatusCode::UNAUTHORIZED),
    }
}

async fn require_key(expected: Option<&str>, header: &str, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(header)
        .and_then(|value| value.to_str().ok());

    match key_rejection(expected, presented) {
        None => next.run(request).await,
        Some(status) => {
            log::warn!("Rejected call to {}: {}", request.uri().path(), status);
            let description = match status {
                StatusCode::SERVICE_UNAVAILABLE => "Route not configured.",
                _ => "Missing or invalid key.",
            };
            (status, Json(json!({ "description": description }))).into_response()
        }
    }
}

async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    require_key(state.admin_api_key.as_deref(), ADMIN_KEY_HEADER, request, next).await
}

/// Stars confirmations come from the payment bot, which signs them with the shared secret.
async fn require_payment_provider(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    require_key(
        state.payment_secret.as_deref(),
        PAYMENT_SECRET_HEADER,
        request,
        next,
    )
    .await
}

fn payment_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/vip/stars", post(vip::confirm_stars_payment))
        .route_layer(middleware::from_fn_with_state(state, require_payment_provider))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/tasks", post(admin::create_task))
        .route("/users/{id}/ban", post(admin::ban_user))
        .route("/users/{id}/unban", post(admin::unban_user))
        .route(
            "/withdrawals/{id}/approve",
            post(admin::approve_withdrawal),
        )
        .route("/withdrawals/{id}/reject", post(admin::reject_withdrawal))
        .route("/vip", get(admin::list_vip_requests))
        .route("/vip/{id}/approve", post(admin::approve_vip_request))
        .route("/vip/{id}/reject", post(admin::reject_vip_request))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

pub async fn start_http_server(
    settings: &settings::Http,
    channels: Channels,
) -> Result<(), anyhow::Error> {
    if settings.admin_api_key.is_none() {
        log::warn!("No admin API key configured, admin routes are disabled.");
    }
    if settings.payment_secret.is_none() {
        log::warn!("No payment secret configured, Stars confirmations are disabled.");
    }

    let app_state = AppState {
        channels,
        admin_api_key: settings.admin_api_key.clone(),
        payment_secret: settings.payment_secret.clone(),
    };

    let app = Router::new()
        .route("/users", post(users::sign_in))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/referrals", get(users::list_referrals))
        .route("/users/{id}/withdrawals", get(withdrawals::list_for_user))
        .route("/farming/start", post(farming::start))
        .route("/farming/stop", post(farming::stop))
        .route("/farming/{device_id}", get(farming::status))
        .route("/rewards/claim", post(rewards::claim))
        .route("/rewards/{user_id}", get(rewards::calendar))
        .route("/tasks", get(tasks::list))
        .route("/tasks/{id}/verify", post(tasks::verify))
        .route("/tasks/{id}/claim", post(tasks::claim))
        .route("/withdrawals", post(withdrawals::request))
        .route("/vip/requests", post(vip::submit_request))
        .merge(payment_routes(app_state.clone()))
        .nest("/admin", admin_routes(app_state.clone()))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
