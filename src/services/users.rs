use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::referrals::ReferralRequest;
use super::{load_user, RequestHandler, Service, ServiceError};
use crate::models::users::{NewUser, User, UserProfile};
use crate::repositories::store::RemoteStore;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::utils::locks::KeyLocks;
use crate::utils::time::TimeProvider;

pub enum UserRequest {
    SignIn {
        identity: NewUser,
        response: oneshot::Sender<Result<UserProfile, ServiceError>>,
    },
    GetUser {
        id: String,
        response: oneshot::Sender<Result<UserProfile, ServiceError>>,
    },
    SetBanned {
        id: String,
        banned: bool,
        response: oneshot::Sender<Result<UserProfile, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    repository: UserRepository,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
    default_rate: f64,
    referral_tx: mpsc::Sender<ReferralRequest>,
}

impl UserRequestHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        locks: KeyLocks,
        clock: Arc<dyn TimeProvider>,
        default_rate: f64,
        referral_tx: mpsc::Sender<ReferralRequest>,
    ) -> Self {
        UserRequestHandler {
            repository: UserRepository::new(store),
            locks,
            clock,
            default_rate,
            referral_tx,
        }
    }

    /// Get-or-create. Profile fields follow the latest Telegram identity.
    async fn sign_in(&self, identity: NewUser) -> Result<UserProfile, ServiceError> {
        let _user = self.locks.lock_user(&identity.id).await;
        let now = self.clock.now_millis();
        let existing = self
            .repository
            .get_user_by_id(&identity.id)
            .await
            .map_err(|e| ServiceError::repository("Users", e))?;

        if let Some(user) = existing {
            let mut updated = user.clone().expire_vip(now);
            updated.username = identity.username.or(updated.username);
            updated.first_name = identity.first_name.or(updated.first_name);
            updated.last_name = identity.last_name.or(updated.last_name);

            if updated != user {
                updated.updated_at = now;
                self.repository
                    .save_user(&updated, WritePolicy::Once)
                    .await
                    .map_err(|e| ServiceError::repository("Users", e))?;
            }
            return Ok(UserProfile::new(updated, now));
        }

        let mut user = User::new(&identity, self.default_rate, now);
        let referrer = match identity.referral_code.as_deref() {
            Some(code) => self.resolve_referrer(code, &user.id).await,
            None => None,
        };
        user.referred_by = referrer.clone();

        self.repository
            .insert_user(&user)
            .await
            .map_err(|e| ServiceError::repository("Users", e))?;
        log::info!("Created user {}", user.id);

        if let Some(referrer_id) = referrer {
            let request = ReferralRequest::AddReferral {
                referrer_id,
                referred_id: user.id.clone(),
                referred_username: user.username.clone(),
            };
            if let Err(e) = self.referral_tx.send(request).await {
                log::error!("Failed to queue referral for {}: {}", user.id, e);
            }
        }

        Ok(UserProfile::new(user, now))
    }

    /// Unknown codes and self-referrals are ignored rather than failing sign-in.
    async fn resolve_referrer(&self, code: &str, user_id: &str) -> Option<String> {
        match self.repository.find_by_referral_code(code).await {
            Ok(Some(referrer)) if referrer.id != user_id => Some(referrer.id),
            Ok(Some(_)) => {
                log::warn!("User {} tried to refer themselves", user_id);
                None
            }
            Ok(None) => {
                log::debug!("Unknown referral code {}", code);
                None
            }
            Err(e) => {
                log::warn!("Could not resolve referral code {}: {}", code, e);
                None
            }
        }
    }

    async fn get_user(&self, id: &str) -> Result<UserProfile, ServiceError> {
        let _user = self.locks.lock_user(id).await;
        let now = self.clock.now_millis();
        let user = load_user(&self.repository, "Users", id).await?;

        let tier = user.tier;
        let user = user.expire_vip(now);
        if user.tier != tier {
            if let Err(e) = self.repository.save_user(&user, WritePolicy::Once).await {
                log::warn!("Could not persist VIP expiry for {}: {}", id, e);
            }
        }

        Ok(UserProfile::new(user, now))
    }

    async fn set_banned(&self, id: &str, banned: bool) -> Result<UserProfile, ServiceError> {
        let _user = self.locks.lock_user(id).await;
        let now = self.clock.now_millis();
        let user = load_user(&self.repository, "Users", id)
            .await?
            .set_banned(banned, now);

        self.repository
            .save_user(&user, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("Users", e))?;

        log::info!("User {} banned: {}", id, banned);
        Ok(UserProfile::new(user, now))
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::SignIn { identity, response } => {
                let profile = self.sign_in(identity).await;
                let _ = response.send(profile);
            }
            UserRequest::GetUser { id, response } => {
                let profile = self.get_user(&id).await;
                let _ = response.send(profile);
            }
            UserRequest::SetBanned {
                id,
                banned,
                response,
            } => {
                let result = self.set_banned(&id, banned).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EconomyError;
    use crate::models::tiers::Tier;
    use crate::models::users::referral_code_for;
    use crate::test_utils::{identity, FlakyStore};
    use crate::utils::time::{TestTimeProvider, MS_PER_DAY};

    fn fixture() -> (
        UserRequestHandler,
        Arc<TestTimeProvider>,
        mpsc::Receiver<ReferralRequest>,
    ) {
        let store: Arc<dyn RemoteStore> = FlakyStore::new();
        let clock = Arc::new(TestTimeProvider::new(1_000));
        let (referral_tx, referral_rx) = mpsc::channel(8);
        let handler =
            UserRequestHandler::new(store, KeyLocks::new(), clock.clone(), 1.0, referral_tx);
        (handler, clock, referral_rx)
    }

    #[tokio::test]
    async fn test_sign_in_creates_once() {
        let (handler, clock, _rx) = fixture();

        let created = handler.sign_in(identity("1")).await.unwrap();
        assert_eq!(created.user.tier, Tier::Free);
        assert_eq!(created.user.referral_code, referral_code_for("1"));
        assert_eq!(created.withdraw_limit, 1);

        clock.advance(5_000);
        let mut renamed = identity("1");
        renamed.username = Some("farmer".into());
        let again = handler.sign_in(renamed).await.unwrap();
        assert_eq!(again.user.created_at, 1_000);
        assert_eq!(again.user.username.as_deref(), Some("farmer"));
    }

    #[tokio::test]
    async fn test_sign_in_with_referral_code() {
        let (handler, _, mut rx) = fixture();
        let referrer = handler.sign_in(identity("1")).await.unwrap();

        let mut invited = identity("2");
        invited.referral_code = Some(referrer.user.referral_code.to_lowercase());
        let profile = handler.sign_in(invited).await.unwrap();
        assert_eq!(profile.user.referred_by.as_deref(), Some("1"));

        match rx.try_recv().unwrap() {
            ReferralRequest::AddReferral {
                referrer_id,
                referred_id,
                referred_username,
            } => {
                assert_eq!(referrer_id, "1");
                assert_eq!(referred_id, "2");
                assert_eq!(referred_username.as_deref(), Some("user2"));
            }
            _ => panic!("expected a referral"),
        }
    }

    #[tokio::test]
    async fn test_self_and_unknown_codes_are_ignored() {
        let (handler, _, mut rx) = fixture();

        let mut own = identity("3");
        own.referral_code = Some(referral_code_for("3"));
        assert_eq!(handler.sign_in(own).await.unwrap().user.referred_by, None);

        let mut unknown = identity("4");
        unknown.referral_code = Some("ZZZZZZZZZZ".into());
        assert_eq!(handler.sign_in(unknown).await.unwrap().user.referred_by, None);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_user_downgrades_expired_vip() {
        let (handler, clock, _rx) = fixture();
        handler.sign_in(identity("5")).await.unwrap();

        let vip = handler
            .repository
            .get_user_by_id("5")
            .await
            .unwrap()
            .unwrap()
            .apply_tier(Tier::Bronze, clock.now_millis())
            .unwrap();
        handler
            .repository
            .save_user(&vip, WritePolicy::Once)
            .await
            .unwrap();

        let profile = handler.get_user("5").await.unwrap();
        assert!(profile.vip_active);
        assert_eq!(profile.multiplier, 1.5);

        clock.advance(31 * MS_PER_DAY);
        let profile = handler.get_user("5").await.unwrap();
        assert!(!profile.vip_active);
        assert_eq!(profile.user.tier, Tier::Free);

        let stored = handler.repository.get_user_by_id("5").await.unwrap().unwrap();
        assert_eq!(stored.tier, Tier::Free);
        assert_eq!(stored.vip_expiry, None);
    }

    #[tokio::test]
    async fn test_ban_and_unban() {
        let (handler, _, _rx) = fixture();
        handler.sign_in(identity("6")).await.unwrap();

        assert!(handler.set_banned("6", true).await.unwrap().user.banned);
        assert!(!handler.set_banned("6", false).await.unwrap().user.banned);
        assert!(matches!(
            handler.set_banned("nobody", true).await,
            Err(ServiceError::Economy(EconomyError::UserNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_first_sign_in_refers_once() {
        let (handler, _, mut rx) = fixture();
        let referrer = handler.sign_in(identity("1")).await.unwrap();

        let mut invited = identity("2");
        invited.referral_code = Some(referrer.user.referral_code);
        let (first, second) = tokio::join!(
            handler.sign_in(invited.clone()),
            handler.sign_in(invited)
        );
        assert_eq!(first.unwrap().user.created_at, second.unwrap().user.created_at);

        assert!(matches!(
            rx.try_recv(),
            Ok(ReferralRequest::AddReferral { .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
