use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{load_user, RequestHandler, Service, ServiceError};
use crate::errors::EconomyError;
use crate::models::status::RequestStatus;
use crate::models::tiers::Tier;
use crate::models::users::UserProfile;
use crate::models::vip::{NewVipRequest, VipPayment, VipRequest};
use crate::repositories::store::RemoteStore;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::repositories::vip::VipRepository;
use crate::utils::locks::{KeyGuard, KeyLocks};
use crate::utils::time::TimeProvider;

pub enum VipRequestMessage {
    ConfirmStarsPayment {
        user_id: String,
        tier: Tier,
        charge_id: String,
        stars: u64,
        response: oneshot::Sender<Result<UserProfile, ServiceError>>,
    },
    Submit {
        request: NewVipRequest,
        response: oneshot::Sender<Result<VipRequest, ServiceError>>,
    },
    Approve {
        request_id: String,
        response: oneshot::Sender<Result<VipRequest, ServiceError>>,
    },
    Reject {
        request_id: String,
        response: oneshot::Sender<Result<VipRequest, ServiceError>>,
    },
    List {
        response: oneshot::Sender<Result<Vec<VipRequest>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct VipRequestHandler {
    repository: VipRepository,
    users: UserRepository,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
}

impl VipRequestHandler {
    pub fn new(store: Arc<dyn RemoteStore>, locks: KeyLocks, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            repository: VipRepository::new(store.clone()),
            users: UserRepository::new(store),
            locks,
            clock,
        }
    }

    /// Instant upgrade after the payment provider confirmed a Stars charge.
    /// A charge id already on record is acknowledged without applying it twice.
    async fn confirm_stars_payment(
        &self,
        user_id: &str,
        tier: Tier,
        charge_id: &str,
        stars: u64,
    ) -> Result<UserProfile, ServiceError> {
        let _charge = self.locks.lock(format!("vipPayments/{}", charge_id)).await;
        let now = self.clock.now_millis();

        let recorded = self
            .repository
            .get_payment(charge_id)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;
        if recorded.is_some() {
            log::warn!("Ignoring duplicate Stars charge {}", charge_id);
            let user = load_user(&self.users, "VIP", user_id).await?;
            return Ok(UserProfile::new(user, now));
        }

        let cost = tier.config().star_cost;
        if tier.is_paid() && stars < cost {
            return Err(EconomyError::InsufficientBalance {
                requested: cost,
                available: stars,
            }
            .into());
        }

        let _user = self.locks.lock_user(user_id).await;
        let user = load_user(&self.users, "VIP", user_id)
            .await?
            .apply_tier(tier, now)?;

        self.repository
            .save_payment(&VipPayment {
                charge_id: charge_id.to_string(),
                user_id: user_id.to_string(),
                tier,
                stars,
                paid_at: now,
            })
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;
        self.users
            .save_user(&user, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;

        log::info!("User {} upgraded to {} with {} stars", user_id, tier, stars);
        Ok(UserProfile::new(user, now))
    }

    async fn submit_request(&self, request: NewVipRequest) -> Result<VipRequest, ServiceError> {
        let now = self.clock.now_millis();
        let user = load_user(&self.users, "VIP", &request.user_id).await?;
        user.ensure_active()?;

        let request = VipRequest::new(request, Uuid::new_v4().hyphenated().to_string(), now)?;
        self.repository
            .save_request(&request)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;

        log::info!(
            "User {} requested {} via {:?}",
            request.user_id,
            request.tier,
            request.method
        );
        Ok(request)
    }

    async fn lock_request(&self, request_id: &str) -> KeyGuard {
        self.locks.lock(format!("vipRequests/{}", request_id)).await
    }

    async fn get_request(&self, request_id: &str) -> Result<VipRequest, ServiceError> {
        self.repository
            .get_request(request_id)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?
            .ok_or_else(|| EconomyError::NotFound("VIP request", request_id.to_string()).into())
    }

    async fn approve_request(&self, request_id: &str) -> Result<VipRequest, ServiceError> {
        let _request = self.lock_request(request_id).await;
        let now = self.clock.now_millis();
        let request = self
            .get_request(request_id)
            .await?
            .decide(RequestStatus::Approved, now)?;

        let _user = self.locks.lock_user(&request.user_id).await;
        let user = load_user(&self.users, "VIP", &request.user_id)
            .await?
            .apply_tier(request.tier, now)?;
        self.users
            .save_user(&user, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;
        self.repository
            .save_request(&request)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;

        log::info!("VIP request {} approved for {}", request.id, request.user_id);
        Ok(request)
    }

    async fn reject_request(&self, request_id: &str) -> Result<VipRequest, ServiceError> {
        let _request = self.lock_request(request_id).await;
        let request = self
            .get_request(request_id)
            .await?
            .decide(RequestStatus::Rejected, self.clock.now_millis())?;

        self.repository
            .save_request(&request)
            .await
            .map_err(|e| ServiceError::repository("VIP", e))?;

        log::info!("VIP request {} rejected", request.id);
        Ok(request)
    }

    async fn list_requests(&self) -> Result<Vec<VipRequest>, ServiceError> {
        self.repository
            .list_requests()
            .await
            .map_err(|e| ServiceError::repository("VIP", e))
    }
}

#[async_trait]
impl RequestHandler<VipRequestMessage> for VipRequestHandler {
    async fn handle_request(&self, request: VipRequestMessage) {
        match request {
            VipRequestMessage::ConfirmStarsPayment {
                user_id,
                tier,
                charge_id,
                stars,
                response,
            } => {
                let result = self
                    .confirm_stars_payment(&user_id, tier, &charge_id, stars)
                    .await;
                let _ = response.send(result);
            }
            VipRequestMessage::Submit { request, response } => {
                let result = self.submit_request(request).await;
                let _ = response.send(result);
            }
            VipRequestMessage::Approve {
                request_id,
                response,
            } => {
                let result = self.approve_request(&request_id).await;
                let _ = response.send(result);
            }
            VipRequestMessage::Reject {
                request_id,
                response,
            } => {
                let result = self.reject_request(&request_id).await;
                let _ = response.send(result);
            }
            VipRequestMessage::List { response } => {
                let result = self.list_requests().await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct VipService;

impl VipService {
    pub fn new() -> Self {
        VipService {}
    }
}

#[async_trait]
impl Service<VipRequestMessage, VipRequestHandler> for VipService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::User;
    use crate::models::vip::PaymentMethod;
    use crate::test_utils::{identity, FlakyStore};
    use crate::utils::time::{TestTimeProvider, MS_PER_DAY};
    use serde_json::json;

    const NOW: i64 = 10 * MS_PER_DAY;

    async fn fixture() -> VipRequestHandler {
        let store: Arc<dyn RemoteStore> = FlakyStore::new();
        UserRepository::new(store.clone())
            .insert_user(&User::new(&identity("8"), 1.0, 0))
            .await
            .unwrap();
        VipRequestHandler::new(store, KeyLocks::new(), Arc::new(TestTimeProvider::new(NOW)))
    }

    fn upi_request(tier: Tier) -> NewVipRequest {
        NewVipRequest {
            user_id: "8".to_string(),
            tier,
            method: PaymentMethod::Upi,
            proof: json!({"utr": "401234567890"}),
        }
    }

    async fn stored_user(handler: &VipRequestHandler) -> User {
        handler.users.get_user_by_id("8").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_stars_payment_applies_once() {
        let handler = fixture().await;

        let profile = handler
            .confirm_stars_payment("8", Tier::Diamond, "charge-1", 250)
            .await
            .unwrap();
        assert_eq!(profile.user.tier, Tier::Diamond);
        assert_eq!(profile.user.vip_expiry, Some(NOW + 30 * MS_PER_DAY));
        assert_eq!(profile.multiplier, 2.5);

        let mut downgraded = stored_user(&handler).await;
        downgraded.tier = Tier::Bronze;
        handler
            .users
            .save_user(&downgraded, WritePolicy::Once)
            .await
            .unwrap();

        let replay = handler
            .confirm_stars_payment("8", Tier::Diamond, "charge-1", 250)
            .await
            .unwrap();
        assert_eq!(replay.user.tier, Tier::Bronze);
    }

    #[tokio::test]
    async fn test_underpaid_stars_rejected() {
        let handler = fixture().await;
        let error = handler
            .confirm_stars_payment("8", Tier::Diamond, "charge-2", 100)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::InsufficientBalance { .. })
        ));
        assert_eq!(stored_user(&handler).await.tier, Tier::Free);
        assert!(handler.repository.get_payment("charge-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manual_request_approved() {
        let handler = fixture().await;
        let request = handler.submit_request(upi_request(Tier::Bronze)).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(stored_user(&handler).await.tier, Tier::Free);

        let approved = handler.approve_request(&request.id).await.unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(stored_user(&handler).await.tier, Tier::Bronze);

        let error = handler.reject_request(&request.id).await.unwrap_err();
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::InvalidTransition { .. })
        ));
        assert_eq!(stored_user(&handler).await.tier, Tier::Bronze);
    }

    #[tokio::test]
    async fn test_rejection_leaves_user_unchanged() {
        let handler = fixture().await;
        let request = handler.submit_request(upi_request(Tier::Diamond)).await.unwrap();

        let rejected = handler.reject_request(&request.id).await.unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert_eq!(stored_user(&handler).await.tier, Tier::Free);

        assert!(handler.approve_request(&request.id).await.is_err());
        assert_eq!(stored_user(&handler).await.tier, Tier::Free);
        assert_eq!(handler.list_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_free_tier_request_rejected() {
        let handler = fixture().await;
        assert!(matches!(
            handler.submit_request(upi_request(Tier::Free)).await,
            Err(ServiceError::Economy(EconomyError::InvalidTier(Tier::Free)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_decisions_on_one_request() {
        let handler = fixture().await;
        let request = handler.submit_request(upi_request(Tier::Bronze)).await.unwrap();

        let (approved, rejected) = tokio::join!(
            handler.approve_request(&request.id),
            handler.reject_request(&request.id)
        );
        assert!(approved.is_ok() != rejected.is_ok());

        let stored = handler.get_request(&request.id).await.unwrap();
        let tier = stored_user(&handler).await.tier;
        match stored.status {
            RequestStatus::Approved => assert_eq!(tier, Tier::Bronze),
            RequestStatus::Rejected => assert_eq!(tier, Tier::Free),
            RequestStatus::Pending => panic!("request left pending"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_approvals_decide_once() {
        let handler = fixture().await;
        let request = handler.submit_request(upi_request(Tier::Bronze)).await.unwrap();

        let (first, second) = tokio::join!(
            handler.approve_request(&request.id),
            handler.approve_request(&request.id)
        );
        let error = match (first, second) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
            _ => panic!("expected exactly one approval"),
        };
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::InvalidTransition { .. })
        ));
        assert_eq!(stored_user(&handler).await.tier, Tier::Bronze);
    }
}
