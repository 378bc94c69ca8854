use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::oneshot;

use super::{load_user, RequestHandler, Service, ServiceError};
use crate::models::rewards::{self, DailyReward, RewardCalendar, RewardSchedule, StreakRules};
use crate::repositories::store::RemoteStore;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::utils::locks::KeyLocks;
use crate::utils::time::TimeProvider;

pub enum RewardRequest {
    Calendar {
        user_id: String,
        response: oneshot::Sender<Result<RewardCalendar, ServiceError>>,
    },
    Claim {
        user_id: String,
        day: u8,
        response: oneshot::Sender<Result<ClaimReceipt, ServiceError>>,
    },
}

#[derive(Debug, Serialize)]
pub struct ClaimReceipt {
    pub reward: DailyReward,
    pub vip_bonus: u64,
    pub coins: u64,
    pub stars: u64,
    pub claim_streak: u32,
    pub claimed_days: Vec<u8>,
}

#[derive(Clone)]
pub struct RewardRequestHandler {
    users: UserRepository,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
    schedule: RewardSchedule,
    rules: StreakRules,
}

impl RewardRequestHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        locks: KeyLocks,
        clock: Arc<dyn TimeProvider>,
        schedule: RewardSchedule,
        rules: StreakRules,
    ) -> Self {
        Self {
            users: UserRepository::new(store),
            locks,
            clock,
            schedule,
            rules,
        }
    }

    async fn calendar(&self, user_id: &str) -> Result<RewardCalendar, ServiceError> {
        let user = load_user(&self.users, "Rewards", user_id).await?;
        Ok(self
            .schedule
            .calendar(&user, &self.rules, self.clock.now_millis()))
    }

    async fn claim(&self, user_id: &str, day: u8) -> Result<ClaimReceipt, ServiceError> {
        let _user = self.locks.lock_user(user_id).await;
        let now = self.clock.now_millis();
        let user = load_user(&self.users, "Rewards", user_id)
            .await?
            .expire_vip(now);

        let claim = rewards::claim_daily_reward(user, day, &self.schedule, &self.rules, now)?;
        self.users
            .save_user(&claim.user, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("Rewards", e))?;

        log::info!(
            "User {} claimed day {} ({} coins, {} bonus, {} stars)",
            user_id,
            day,
            claim.reward.coins,
            claim.vip_bonus,
            claim.reward.stars
        );
        Ok(ClaimReceipt {
            reward: claim.reward,
            vip_bonus: claim.vip_bonus,
            coins: claim.user.coins,
            stars: claim.user.stars,
            claim_streak: claim.user.claim_streak,
            claimed_days: claim.user.claimed_days,
        })
    }
}

#[async_trait]
impl RequestHandler<RewardRequest> for RewardRequestHandler {
    async fn handle_request(&self, request: RewardRequest) {
        match request {
            RewardRequest::Calendar { user_id, response } => {
                let result = self.calendar(&user_id).await;
                let _ = response.send(result);
            }
            RewardRequest::Claim {
                user_id,
                day,
                response,
            } => {
                let result = self.claim(&user_id, day).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct RewardService;

impl RewardService {
    pub fn new() -> Self {
        RewardService {}
    }
}

#[async_trait]
impl Service<RewardRequest, RewardRequestHandler> for RewardService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EconomyError;
    use crate::models::users::User;
    use crate::settings::Settings;
    use crate::test_utils::{identity, FlakyStore};
    use crate::utils::time::{TestTimeProvider, MS_PER_DAY, MS_PER_HOUR};

    async fn fixture() -> (RewardRequestHandler, Arc<TestTimeProvider>, UserRepository) {
        let store: Arc<dyn RemoteStore> = FlakyStore::new();
        let users = UserRepository::new(store.clone());
        users
            .insert_user(&User::new(&identity("1"), 1.0, 0))
            .await
            .unwrap();

        let clock = Arc::new(TestTimeProvider::new(MS_PER_HOUR));
        let economy = Settings::for_tests().economy;
        let handler = RewardRequestHandler::new(
            store,
            KeyLocks::new(),
            clock.clone(),
            economy.reward_schedule(),
            economy.streak_rules(),
        );
        (handler, clock, users)
    }

    #[tokio::test]
    async fn test_week_of_claims() {
        let (handler, clock, _) = fixture().await;

        for day in 1..=7 {
            let receipt = handler.claim("1", day).await.unwrap();
            assert_eq!(receipt.claim_streak, u32::from(day));
            clock.advance(MS_PER_DAY);
        }

        let calendar = handler.calendar("1").await.unwrap();
        assert_eq!(calendar.claim_streak, 7);
        assert!(calendar.claim_available);
        // a completed week rolls over to day one
        assert_eq!(calendar.next_day, 1);
    }

    #[tokio::test]
    async fn test_cooldown_leaves_record_untouched() {
        let (handler, clock, users) = fixture().await;
        handler.claim("1", 1).await.unwrap();
        let before = users.get_user_by_id("1").await.unwrap().unwrap();

        clock.advance(MS_PER_HOUR);
        let error = handler.claim("1", 2).await.unwrap_err();
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::CooldownActive { .. })
        ));
        assert_eq!(users.get_user_by_id("1").await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_diamond_member_gets_bonus() {
        let (handler, _, users) = fixture().await;
        let vip = users
            .get_user_by_id("1")
            .await
            .unwrap()
            .unwrap()
            .apply_tier(crate::models::tiers::Tier::Diamond, 0)
            .unwrap();
        users.save_user(&vip, WritePolicy::Once).await.unwrap();

        let receipt = handler.claim("1", 1).await.unwrap();
        assert_eq!(receipt.reward.coins, 50);
        assert_eq!(receipt.vip_bonus, 75);
        assert_eq!(receipt.coins, 125);
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let (handler, _, _) = fixture().await;
        assert!(matches!(
            handler.calendar("nobody").await.unwrap_err(),
            ServiceError::Economy(EconomyError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_claims_pay_once() {
        let (handler, _, users) = fixture().await;

        let (first, second) = tokio::join!(handler.claim("1", 1), handler.claim("1", 1));
        let error = match (first, second) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
            _ => panic!("expected exactly one claim"),
        };
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::CooldownActive { .. })
        ));

        let user = users.get_user_by_id("1").await.unwrap().unwrap();
        assert_eq!(user.coins, 50);
        assert_eq!(user.claimed_days, vec![1]);
    }
}
