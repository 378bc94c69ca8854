use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{load_user, RequestHandler, Service, ServiceError};
use crate::errors::EconomyError;
use crate::models::status::RequestStatus;
use crate::models::withdrawals::{self, NewWithdrawal, Withdrawal};
use crate::repositories::store::RemoteStore;
use crate::repositories::users::{UserRepository, WritePolicy};
use crate::repositories::withdrawals::WithdrawalRepository;
use crate::utils::locks::KeyLocks;
use crate::utils::time::TimeProvider;

pub enum WithdrawalRequest {
    Request {
        request: NewWithdrawal,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    Approve {
        withdrawal_id: String,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    Reject {
        withdrawal_id: String,
        response: oneshot::Sender<Result<Withdrawal, ServiceError>>,
    },
    ListForUser {
        user_id: String,
        response: oneshot::Sender<Result<Vec<Withdrawal>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct WithdrawalRequestHandler {
    repository: WithdrawalRepository,
    users: UserRepository,
    locks: KeyLocks,
    clock: Arc<dyn TimeProvider>,
    refund_rejected: bool,
}

impl WithdrawalRequestHandler {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        locks: KeyLocks,
        clock: Arc<dyn TimeProvider>,
        refund_rejected: bool,
    ) -> Self {
        Self {
            repository: WithdrawalRepository::new(store.clone()),
            users: UserRepository::new(store),
            locks,
            clock,
            refund_rejected,
        }
    }

    async fn request_withdrawal(&self, request: NewWithdrawal) -> Result<Withdrawal, ServiceError> {
        // Covers the quota check as well as the debit.
        let _user = self.locks.lock_user(&request.user_id).await;
        let now = self.clock.now_millis();
        let user = load_user(&self.users, "Withdrawals", &request.user_id)
            .await?
            .expire_vip(now);
        let existing = self
            .repository
            .list_for_user(&user.id)
            .await
            .map_err(|e| ServiceError::repository("Withdrawals", e))?;

        let id = Uuid::new_v4().hyphenated().to_string();
        let (user, withdrawal) = withdrawals::request_withdrawal(user, &existing, request, id, now)?;

        // Debit first: a lost request record is recoverable by an admin, a lost debit is not.
        self.users
            .save_user(&user, WritePolicy::Retry)
            .await
            .map_err(|e| ServiceError::repository("Withdrawals", e))?;
        self.repository
            .save_withdrawal(&withdrawal)
            .await
            .map_err(|e| ServiceError::repository("Withdrawals", e))?;

        log::info!(
            "User {} requested withdrawal {} of {} via {}",
            user.id,
            withdrawal.id,
            withdrawal.amount,
            withdrawal.method
        );
        Ok(withdrawal)
    }

    async fn decide(
        &self,
        withdrawal_id: &str,
        status: RequestStatus,
    ) -> Result<Withdrawal, ServiceError> {
        let _request = self
            .locks
            .lock(format!("withdrawals/{}", withdrawal_id))
            .await;
        let now = self.clock.now_millis();
        let withdrawal = self
            .repository
            .get_withdrawal(withdrawal_id)
            .await
            .map_err(|e| ServiceError::repository("Withdrawals", e))?
            .ok_or_else(|| EconomyError::NotFound("withdrawal", withdrawal_id.to_string()))?
            .decide(status, now)?;

        if status == RequestStatus::Rejected && self.refund_rejected {
            let _user = self.locks.lock_user(&withdrawal.user_id).await;
            let user = load_user(&self.users, "Withdrawals", &withdrawal.user_id)
                .await?
                .refund(withdrawal.amount, now);
            self.users
                .save_user(&user, WritePolicy::Retry)
                .await
                .map_err(|e| ServiceError::repository("Withdrawals", e))?;
        }

        self.repository
            .save_withdrawal(&withdrawal)
            .await
            .map_err(|e| ServiceError::repository("Withdrawals", e))?;

        log::info!("Withdrawal {} {}", withdrawal.id, withdrawal.status);
        Ok(withdrawal)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Withdrawal>, ServiceError> {
        self.repository
            .list_for_user(user_id)
            .await
            .map_err(|e| ServiceError::repository("Withdrawals", e))
    }
}

#[async_trait]
impl RequestHandler<WithdrawalRequest> for WithdrawalRequestHandler {
    async fn handle_request(&self, request: WithdrawalRequest) {
        match request {
            WithdrawalRequest::Request { request, response } => {
                let result = self.request_withdrawal(request).await;
                let _ = response.send(result);
            }
            WithdrawalRequest::Approve {
                withdrawal_id,
                response,
            } => {
                let result = self.decide(&withdrawal_id, RequestStatus::Approved).await;
                let _ = response.send(result);
            }
            WithdrawalRequest::Reject {
                withdrawal_id,
                response,
            } => {
                let result = self.decide(&withdrawal_id, RequestStatus::Rejected).await;
                let _ = response.send(result);
            }
            WithdrawalRequest::ListForUser { user_id, response } => {
                let result = self.list_for_user(&user_id).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct WithdrawalService;

impl WithdrawalService {
    pub fn new() -> Self {
        WithdrawalService {}
    }
}

#[async_trait]
impl Service<WithdrawalRequest, WithdrawalRequestHandler> for WithdrawalService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::User;
    use crate::test_utils::{identity, FlakyStore};
    use crate::utils::time::{TestTimeProvider, MS_PER_DAY, MS_PER_HOUR};
    use serde_json::json;

    // 2024-03-02T00:00:00Z
    const MIDNIGHT: i64 = 1_709_337_600_000;

    async fn fixture(
        refund: bool,
    ) -> (WithdrawalRequestHandler, Arc<TestTimeProvider>, UserRepository) {
        let store: Arc<dyn RemoteStore> = FlakyStore::new();
        let users = UserRepository::new(store.clone());
        let user = User::new(&identity("9"), 1.0, 0).credit_earnings(5_000, 0);
        users.insert_user(&user).await.unwrap();

        let clock = Arc::new(TestTimeProvider::new(MIDNIGHT + MS_PER_HOUR));
        let handler =
            WithdrawalRequestHandler::new(store, KeyLocks::new(), clock.clone(), refund);
        (handler, clock, users)
    }

    fn new_withdrawal(amount: u64) -> NewWithdrawal {
        NewWithdrawal {
            user_id: "9".to_string(),
            amount,
            method: "upi".to_string(),
            details: json!({"vpa": "farmer@upi"}),
        }
    }

    async fn coins(users: &UserRepository) -> u64 {
        users.get_user_by_id("9").await.unwrap().unwrap().coins
    }

    #[tokio::test]
    async fn test_free_tier_one_request_per_day() {
        let (handler, clock, users) = fixture(true).await;

        let first = handler
            .request_withdrawal(new_withdrawal(1_000))
            .await
            .unwrap();
        assert_eq!(first.status, RequestStatus::Pending);
        assert_eq!(coins(&users).await, 4_000);

        clock.advance(MS_PER_HOUR);
        let error = handler
            .request_withdrawal(new_withdrawal(1_000))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::DailyQuotaExceeded { limit: 1 })
        ));
        assert_eq!(coins(&users).await, 4_000);
        assert_eq!(handler.list_for_user("9").await.unwrap().len(), 1);

        clock.set_time(MIDNIGHT + MS_PER_DAY);
        handler
            .request_withdrawal(new_withdrawal(1_000))
            .await
            .unwrap();
        assert_eq!(coins(&users).await, 3_000);
    }

    #[tokio::test]
    async fn test_rejection_refunds() {
        let (handler, _, users) = fixture(true).await;
        let request = handler
            .request_withdrawal(new_withdrawal(2_000))
            .await
            .unwrap();

        let rejected = handler
            .decide(&request.id, RequestStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(rejected.status, RequestStatus::Rejected);
        assert!(rejected.processed_at.is_some());
        assert_eq!(coins(&users).await, 5_000);

        let error = handler
            .decide(&request.id, RequestStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::InvalidTransition { .. })
        ));
        assert_eq!(coins(&users).await, 5_000);
    }

    #[tokio::test]
    async fn test_rejection_without_refund() {
        let (handler, _, users) = fixture(false).await;
        let request = handler
            .request_withdrawal(new_withdrawal(2_000))
            .await
            .unwrap();
        handler
            .decide(&request.id, RequestStatus::Rejected)
            .await
            .unwrap();
        assert_eq!(coins(&users).await, 3_000);
    }

    #[tokio::test]
    async fn test_approval_keeps_debit() {
        let (handler, _, users) = fixture(true).await;
        let request = handler
            .request_withdrawal(new_withdrawal(1_500))
            .await
            .unwrap();
        let approved = handler
            .decide(&request.id, RequestStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(coins(&users).await, 3_500);

        assert!(matches!(
            handler.decide("missing", RequestStatus::Approved).await,
            Err(ServiceError::Economy(EconomyError::NotFound("withdrawal", _)))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let (handler, _, users) = fixture(true).await;
        let error = handler
            .request_withdrawal(new_withdrawal(6_000))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ServiceError::Economy(EconomyError::InsufficientBalance { .. })
        ));
        assert_eq!(coins(&users).await, 5_000);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_the_quota() {
        let (handler, _, users) = fixture(true).await;

        let (first, second) = tokio::join!(
            handler.request_withdrawal(new_withdrawal(1_000)),
            handler.request_withdrawal(new_withdrawal(1_000))
        );
        assert!(first.is_ok() != second.is_ok());
        assert!(matches!(
            first.or(second),
            Ok(Withdrawal {
                status: RequestStatus::Pending,
                ..
            })
        ));

        assert_eq!(handler.list_for_user("9").await.unwrap().len(), 1);
        assert_eq!(coins(&users).await, 4_000);
    }

    #[tokio::test]
    async fn test_concurrent_decisions_apply_once() {
        let (handler, _, users) = fixture(true).await;
        let request = handler
            .request_withdrawal(new_withdrawal(2_000))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            handler.decide(&request.id, RequestStatus::Rejected),
            handler.decide(&request.id, RequestStatus::Rejected)
        );
        let errors = [first, second]
            .into_iter()
            .filter_map(Result::err)
            .collect::<Vec<_>>();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            ServiceError::Economy(EconomyError::InvalidTransition { .. })
        ));
        assert_eq!(coins(&users).await, 5_000);
    }
}
