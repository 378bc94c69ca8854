use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::errors::EconomyError;
use crate::models::users::User;
use crate::repositories::sessions::SessionCache;
use crate::repositories::store::RemoteStore;
use crate::repositories::users::UserRepository;
use crate::settings::Settings;
use crate::utils::locks::KeyLocks;
use crate::utils::time::TimeProvider;

mod farming;
mod http;
mod referrals;
mod rewards;
mod tasks;
mod users;
mod vip;
mod withdrawals;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Economy(#[from] EconomyError),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl ServiceError {
    fn repository(service: &str, e: anyhow::Error) -> Self {
        ServiceError::Repository(service.to_string(), e.to_string())
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Sends `request` built around a fresh response channel and waits for the answer.
pub(crate) async fn call<R, T>(
    channel: &mpsc::Sender<R>,
    service: &str,
    request: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(request(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?
}

/// Fetches a user, mapping absence to `UserNotFound`.
pub(crate) async fn load_user(
    users: &UserRepository,
    service: &str,
    user_id: &str,
) -> Result<User, ServiceError> {
    users
        .get_user_by_id(user_id)
        .await
        .map_err(|e| ServiceError::repository(service, e))?
        .ok_or_else(|| EconomyError::UserNotFound(user_id.to_string()).into())
}

pub async fn start_services(
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn TimeProvider>,
    settings: Settings,
) -> Result<(), anyhow::Error> {
    let (farming_tx, mut farming_rx) = mpsc::channel(512);
    let (referral_tx, mut referral_rx) = mpsc::channel(512);
    let (reward_tx, mut reward_rx) = mpsc::channel(512);
    let (task_tx, mut task_rx) = mpsc::channel(512);
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (vip_tx, mut vip_rx) = mpsc::channel(512);
    let (withdrawal_tx, mut withdrawal_rx) = mpsc::channel(512);

    let mut farming_service = farming::FarmingService::new();
    let mut referral_service = referrals::ReferralService::new();
    let mut reward_service = rewards::RewardService::new();
    let mut task_service = tasks::TaskService::new();
    let mut user_service = users::UserService::new();
    let mut vip_service = vip::VipService::new();
    let mut withdrawal_service = withdrawals::WithdrawalService::new();

    // Requests are handled concurrently; every handler shares these record locks.
    let locks = KeyLocks::new();

    log::info!("Starting referral service.");
    let referral_handler = referrals::ReferralRequestHandler::new(
        store.clone(),
        locks.clone(),
        clock.clone(),
        settings.economy.referral_commission_bps,
        settings.economy.referral_signup_bonus,
    );
    tokio::spawn(async move {
        referral_service
            .run(referral_handler, &mut referral_rx)
            .await;
    });

    log::info!("Starting farming service.");
    let sessions = SessionCache::open(settings.farming.session_dir.as_deref()).await?;
    let farming_handler = farming::FarmingRequestHandler::new(
        store.clone(),
        sessions,
        locks.clone(),
        clock.clone(),
        settings.farming.clone(),
        referral_tx.clone(),
    );
    farming_handler.restore_sessions().await;
    tokio::spawn(async move {
        farming_service.run(farming_handler, &mut farming_rx).await;
    });

    log::info!("Starting reward service.");
    let reward_handler = rewards::RewardRequestHandler::new(
        store.clone(),
        locks.clone(),
        clock.clone(),
        settings.economy.reward_schedule(),
        settings.economy.streak_rules(),
    );
    tokio::spawn(async move {
        reward_service.run(reward_handler, &mut reward_rx).await;
    });

    log::info!("Starting task service.");
    let task_handler = tasks::TaskRequestHandler::new(
        store.clone(),
        locks.clone(),
        clock.clone(),
        referral_tx.clone(),
    );
    tokio::spawn(async move {
        task_service.run(task_handler, &mut task_rx).await;
    });

    log::info!("Starting user service.");
    let user_handler = users::UserRequestHandler::new(
        store.clone(),
        locks.clone(),
        clock.clone(),
        settings.farming.default_rate,
        referral_tx.clone(),
    );
    tokio::spawn(async move {
        user_service.run(user_handler, &mut user_rx).await;
    });

    log::info!("Starting VIP service.");
    let vip_handler = vip::VipRequestHandler::new(store.clone(), locks.clone(), clock.clone());
    tokio::spawn(async move {
        vip_service.run(vip_handler, &mut vip_rx).await;
    });

    log::info!("Starting withdrawal service.");
    let withdrawal_handler = withdrawals::WithdrawalRequestHandler::new(
        store.clone(),
        locks,
        clock.clone(),
        settings.economy.refund_rejected_withdrawals,
    );
    tokio::spawn(async move {
        withdrawal_service
            .run(withdrawal_handler, &mut withdrawal_rx)
            .await;
    });

    log::info!("Starting HTTP server.");
    let channels = http::Channels {
        farming: farming_tx,
        referrals: referral_tx,
        rewards: reward_tx,
        tasks: task_tx,
        users: user_tx,
        vip: vip_tx,
        withdrawals: withdrawal_tx,
    };
    http::start_http_server(&settings.http, channels).await
}
