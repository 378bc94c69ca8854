use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{load_user, RequestHandler, Service, ServiceError};
use crate::models::referrals::{self, Referral};
use crate::repositories::referrals::ReferralRepository;
use crate::repositories::store::RemoteStore;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::utils::locks::KeyLocks;
use crate::utils::time::TimeProvider;

pub enum ReferralRequest {
    AddReferral {
        referrer_id: String,
        referred_id: String,
        referred_username: Option<String>,
    },
    CreditEarnings {
        referred_id: String,
        earnings: u64,
    },
    ListReferrals {
        referrer_id: String,
        response: oneshot::Sender<Result<ReferralSummary, ServiceError>>,
    },
}

#[derive(Debug, Serialize)]
pub struct ReferralSummary {
    pub total_referrals: usize,
    pub total_earnings: u64,
    pub referrals: Vec<Referral>,
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    repository: ReferralRepository,
    users: UserRepository,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
    commission_bps: u64,
    signup_bonus: u64,
}

impl ReferralRequestHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        locks: KeyLocks,
        clock: Arc<dyn TimeProvider>,
        commission_bps: u64,
        signup_bonus: u64,
    ) -> Self {
        Self {
            repository: ReferralRepository::new(store.clone()),
            users: UserRepository::new(store),
            locks,
            clock,
            commission_bps,
            signup_bonus,
        }
    }

    async fn add_referral(
        &self,
        referrer_id: &str,
        referred_id: &str,
        referred_username: Option<String>,
    ) -> Result<Referral, ServiceError> {
        let _referrer = self.locks.lock_user(referrer_id).await;
        let now = self.clock.now_millis();
        let referrer = load_user(&self.users, "Referrals", referrer_id).await?;

        let referral = Referral {
            id: Uuid::new_v4().hyphenated().to_string(),
            referrer_id: referrer_id.to_string(),
            referred_id: referred_id.to_string(),
            referred_username,
            total_earnings: 0,
            created_at: now,
        };
        self.repository
            .insert_referral(&referral)
            .await
            .map_err(|e| ServiceError::repository("Referrals", e))?;

        let bonus = referrals::signup_bonus(
            self.signup_bonus,
            referrer.tier_config().referral_multiplier,
        );
        let mut referrer = referrer.credit_earnings(bonus, now);
        referrer.total_referrals += 1;

        self.users
            .save_user(&referrer, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("Referrals", e))?;

        log::info!(
            "User {} referred {} (bonus {})",
            referrer_id,
            referred_id,
            bonus
        );
        Ok(referral)
    }

    /// Credits the commission on `earnings` to whoever referred `referred_id`.
    /// Returns the total amount credited.
    async fn update_referral_earnings(
        &self,
        referred_id: &str,
        earnings: u64,
    ) -> Result<u64, ServiceError> {
        let commission = referrals::commission(earnings, self.commission_bps);
        if commission == 0 {
            return Ok(0);
        }

        let matches = self
            .repository
            .find_referrals_for(referred_id)
            .await
            .map_err(|e| ServiceError::repository("Referrals", e))?;

        let now = self.clock.now_millis();
        let mut credited = 0;
        for found in matches {
            // The referrer lock also covers that referrer's ledger records.
            let _referrer = self.locks.lock_user(&found.referrer_id).await;
            let referral = self
                .repository
                .get_referral(&found.referrer_id, &found.id)
                .await
                .map_err(|e| ServiceError::repository("Referrals", e))?
                .unwrap_or(found);

            let Some(referrer) = self
                .users
                .get_user_by_id(&referral.referrer_id)
                .await
                .map_err(|e| ServiceError::repository("Referrals", e))?
            else {
                log::warn!(
                    "Referral {} points at missing referrer {}",
                    referral.id,
                    referral.referrer_id
                );
                continue;
            };

            let referrer = referrer.credit_earnings(commission, now);
            self.users
                .save_user(&referrer, WritePolicy::Retry)
                .await
                .map_err(|e| ServiceError::repository("Referrals", e))?;

            // The referrer's balance is authoritative; a stale per-referral total is tolerated.
            if let Err(e) = self.repository.save_referral(&referral.credit(commission)).await {
                log::warn!("Could not update referral totals for {}: {}", referred_id, e);
            }
            credited += commission;
        }

        Ok(credited)
    }

    async fn list_referrals(&self, referrer_id: &str) -> Result<ReferralSummary, ServiceError> {
        let referrals = self
            .repository
            .list_referrals(referrer_id)
            .await
            .map_err(|e| ServiceError::repository("Referrals", e))?;

        Ok(ReferralSummary {
            total_referrals: referrals.len(),
            total_earnings: referrals.iter().map(|r| r.total_earnings).sum(),
            referrals,
        })
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::AddReferral {
                referrer_id,
                referred_id,
                referred_username,
            } => {
                if let Err(e) = self
                    .add_referral(&referrer_id, &referred_id, referred_username)
                    .await
                {
                    log::error!("Failed to record referral of {}: {}", referred_id, e);
                }
            }
            ReferralRequest::CreditEarnings {
                referred_id,
                earnings,
            } => match self.update_referral_earnings(&referred_id, earnings).await {
                Ok(0) => (),
                Ok(credited) => {
                    log::debug!("Credited {} commission for {}", credited, referred_id)
                }
                Err(e) => log::error!("Failed to credit commission for {}: {}", referred_id, e),
            },
            ReferralRequest::ListReferrals {
                referrer_id,
                response,
            } => {
                let result = self.list_referrals(&referrer_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}
