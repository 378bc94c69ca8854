use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::referrals::ReferralRequest;
use super::{load_user, RequestHandler, Service, ServiceError};
use crate::errors::EconomyError;
use crate::models::farming::{ConnectionQuality, FarmingSession, FarmingSummary};
use crate::models::users::User;
use crate::repositories::sessions::SessionCache;
use crate::repositories::store::RemoteStore;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::settings;
use crate::utils::locks::{KeyGuard, KeyLocks};
use crate::utils::time::TimeProvider;

pub enum FarmingRequest {
    Start {
        user_id: String,
        device_id: String,
        connection: ConnectionQuality,
        response: oneshot::Sender<Result<FarmingSession, ServiceError>>,
    },
    Stop {
        device_id: String,
        response: oneshot::Sender<Result<FarmingSummary, ServiceError>>,
    },
    Status {
        device_id: String,
        response: oneshot::Sender<Result<Option<FarmingSession>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct FarmingRequestHandler {
    users: UserRepository,
    sessions: SessionCache,
    tickers: Arc<DashMap<String, JoinHandle<()>>>,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
    settings: settings::Farming,
    referral_tx: mpsc::Sender<ReferralRequest>,
}

impl FarmingRequestHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        sessions: SessionCache,
        locks: KeyLocks,
        clock: Arc<dyn TimeProvider>,
        settings: settings::Farming,
        referral_tx: mpsc::Sender<ReferralRequest>,
    ) -> Self {
        Self {
            users: UserRepository::new(store),
            sessions,
            tickers: Arc::new(DashMap::new()),
            locks,
            clock,
            settings,
            referral_tx,
        }
    }

    /// Serializes every session mutation on one device.
    async fn lock_device(&self, device_id: &str) -> KeyGuard {
        self.locks.lock(format!("devices/{}", device_id)).await
    }

    async fn load_session(&self, device_id: &str) -> Result<Option<FarmingSession>, ServiceError> {
        self.sessions
            .load(device_id)
            .await
            .map_err(|e| ServiceError::repository("Farming", e))
    }

    async fn cache_session(&self, session: &FarmingSession) -> Result<(), ServiceError> {
        self.sessions
            .save(session)
            .await
            .map_err(|e| ServiceError::repository("Farming", e))
    }

    async fn clear_session(&self, device_id: &str) {
        if let Err(e) = self.sessions.clear(device_id).await {
            log::warn!("Could not clear cached session for {}: {}", device_id, e);
        }
    }

    /// Writes whatever part of `session` the user record does not hold yet,
    /// in one write attempt. Returns the user and the amount credited.
    async fn sync_session(&self, session: &FarmingSession) -> Result<(User, u64), ServiceError> {
        let _user = self.locks.lock_user(&session.user_id).await;
        let user = load_user(&self.users, "Farming", &session.user_id).await?;

        let (user, credited) = session.credit_to(user, self.clock.now_millis());
        if credited > 0 {
            self.users
                .save_user(&user, WritePolicy::Once)
                .await
                .map_err(|e| ServiceError::repository("Farming", e))?;
        }

        Ok((user, credited))
    }

    /// Pushes the earnings of a stopped session that never reached the store.
    /// Returns whether the cached session could be dropped.
    async fn flush_pending(&self, session: FarmingSession) -> bool {
        let pending = session.unsynced();
        if pending == 0 {
            self.clear_session(&session.device_id).await;
            return true;
        }

        match self.sync_session(&session).await {
            Ok((_, credited)) => {
                if credited > 0 {
                    log::info!(
                        "Synced {} pending coins from device {} to user {}",
                        credited,
                        session.device_id,
                        session.user_id
                    );
                }
                self.clear_session(&session.device_id).await;
                true
            }
            Err(ServiceError::Economy(e)) => {
                log::error!(
                    "Dropping {} pending coins from device {}: {}",
                    pending,
                    session.device_id,
                    e
                );
                self.clear_session(&session.device_id).await;
                true
            }
            Err(e) => {
                log::warn!(
                    "Pending coins on device {} still unsynced: {}",
                    session.device_id,
                    e
                );
                false
            }
        }
    }

    async fn start_farming(
        &self,
        user_id: &str,
        device_id: &str,
        connection: ConnectionQuality,
    ) -> Result<FarmingSession, ServiceError> {
        let _guard = self.lock_device(device_id).await;

        if let Some(cached) = self.load_session(device_id).await? {
            if cached.active {
                return Err(EconomyError::SessionAlreadyActive(device_id.to_string()).into());
            }
            // The cached session is the only record of those coins.
            if !self.flush_pending(cached).await {
                return Err(EconomyError::PendingSync(device_id.to_string()).into());
            }
        }

        let now = self.clock.now_millis();
        let user = {
            let _user = self.locks.lock_user(user_id).await;
            let user = load_user(&self.users, "Farming", user_id).await?;

            let tier = user.tier;
            let user = user.expire_vip(now);
            if user.tier != tier {
                if let Err(e) = self.users.save_user(&user, WritePolicy::Once).await {
                    log::warn!("Could not persist VIP expiry for {}: {}", user.id, e);
                }
            }
            user
        };

        let session = FarmingSession::start(&user, device_id, now)?;
        self.cache_session(&session).await?;

        let interval =
            connection.tick_interval(self.settings.fast_tick_ms, self.settings.slow_tick_ms);
        self.spawn_ticker(device_id, interval);

        log::info!(
            "User {} started farming on {} at {} x{}",
            user_id,
            device_id,
            session.base_rate,
            session.multiplier
        );
        Ok(session)
    }

    /// One ticker step: accrues the session and credits whatever has not yet
    /// reached the user record. Returns the amount credited.
    pub async fn update_farming_earnings(&self, device_id: &str) -> Result<u64, ServiceError> {
        let _guard = self.lock_device(device_id).await;

        let session = self
            .load_session(device_id)
            .await?
            .ok_or_else(|| EconomyError::SessionNotActive(device_id.to_string()))?;

        let accrual = session.accrue(self.clock.now_millis(), self.settings.min_elapsed_ms())?;
        let session = accrual.session;
        self.cache_session(&session).await?;
        if session.unsynced() == 0 {
            return Ok(0);
        }

        let (_, credited) = self.sync_session(&session).await?;
        // If this write is lost the user's checkpoint still blocks a second credit.
        if let Err(e) = self.cache_session(&session.mark_synced()).await {
            log::warn!("Could not checkpoint session on {}: {}", device_id, e);
        }

        Ok(credited)
    }

    async fn stop_farming(&self, device_id: &str) -> Result<FarmingSummary, ServiceError> {
        let _guard = self.lock_device(device_id).await;

        if let Some((_, ticker)) = self.tickers.remove(device_id) {
            ticker.abort();
        }

        let session = self
            .load_session(device_id)
            .await?
            .ok_or_else(|| EconomyError::SessionNotActive(device_id.to_string()))?;
        if !session.active {
            self.flush_pending(session).await;
            return Err(EconomyError::SessionNotActive(device_id.to_string()).into());
        }

        let accrual = session.stop(self.clock.now_millis())?;
        let stopped = accrual.session;
        // Cached first: until the store accepts the credit this is the only record of it.
        self.cache_session(&stopped).await?;

        let pending = stopped.unsynced();
        let (coins, synced) = match self.sync_session(&stopped).await {
            Ok((user, _)) => {
                self.clear_session(device_id).await;
                (user.coins, true)
            }
            Err(ServiceError::Economy(e)) => {
                self.clear_session(device_id).await;
                return Err(e.into());
            }
            Err(e) => {
                log::error!(
                    "Could not sync {} coins for user {} after stop on {}: {}",
                    pending,
                    stopped.user_id,
                    device_id,
                    e
                );
                (0, false)
            }
        };

        if stopped.total_earned > 0 {
            let request = ReferralRequest::CreditEarnings {
                referred_id: stopped.user_id.clone(),
                earnings: stopped.total_earned,
            };
            if let Err(e) = self.referral_tx.send(request).await {
                log::error!("Failed to queue referral commission: {}", e);
            }
        }

        log::info!(
            "User {} stopped farming on {}, earned {}",
            stopped.user_id,
            device_id,
            stopped.total_earned
        );
        Ok(FarmingSummary {
            earned: stopped.total_earned,
            coins,
            synced,
            session: stopped,
        })
    }

    fn spawn_ticker(&self, device_id: &str, interval: Duration) {
        let handler = self.clone();
        let device = device_id.to_string();

        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                interval.tick().await;
                match handler.update_farming_earnings(&device).await {
                    Ok(credited) if credited > 0 => {
                        log::debug!("Credited {} coins from device {}", credited, device)
                    }
                    Ok(_) => (),
                    Err(ServiceError::Economy(EconomyError::SessionNotActive(_))) => break,
                    Err(e) => log::warn!("Farming tick on {} failed: {}", device, e),
                }
            }
        });

        if let Some(previous) = self.tickers.insert(device_id.to_string(), ticker) {
            previous.abort();
        }
    }

    /// Resumes tickers for sessions that were active when the process stopped
    /// and retries the sync of stopped ones.
    pub async fn restore_sessions(&self) {
        let sessions = match self.sessions.load_all().await {
            Ok(sessions) => sessions,
            Err(e) => {
                log::error!("Could not read session cache: {}", e);
                return;
            }
        };

        let mut resumed = 0;
        let mut unsynced = 0;
        for session in sessions {
            if session.active {
                let interval = ConnectionQuality::default()
                    .tick_interval(self.settings.fast_tick_ms, self.settings.slow_tick_ms);
                self.spawn_ticker(&session.device_id, interval);
                resumed += 1;
            } else {
                let _guard = self.lock_device(&session.device_id).await;
                if !self.flush_pending(session).await {
                    unsynced += 1;
                }
            }
        }

        if resumed > 0 || unsynced > 0 {
            log::info!(
                "Resumed {} farming sessions, {} stopped sessions still unsynced",
                resumed,
                unsynced
            );
        }
    }
}

#[async_trait]
impl RequestHandler<FarmingRequest> for FarmingRequestHandler {
    async fn handle_request(&self, request: FarmingRequest) {
        match request {
            FarmingRequest::Start {
                user_id,
                device_id,
                connection,
                response,
            } => {
                let result = self.start_farming(&user_id, &device_id, connection).await;
                let _ = response.send(result);
            }
            FarmingRequest::Stop {
                device_id,
                response,
            } => {
                let result = self.stop_farming(&device_id).await;
                let _ = response.send(result);
            }
            FarmingRequest::Status {
                device_id,
                response,
            } => {
                let result = self.load_session(&device_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct FarmingService;

impl FarmingService {
    pub fn new() -> Self {
        FarmingService {}
    }
}

#[async_trait]
impl Service<FarmingRequest, FarmingRequestHandler> for FarmingService {}
