use serde::{Deserialize, Serialize};

use crate::errors::EconomyError;
use crate::models::status::RequestStatus;
use crate::models::users::User;
use crate::utils::time::calendar_day;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount: u64,
    pub status: RequestStatus,
    pub method: String,
    #[serde(default)]
    pub details: serde_json::Value,
    pub requested_at: i64,
    pub processed_at: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewWithdrawal {
    pub user_id: String,
    pub amount: u64,
    pub method: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Requests the user made on the UTC calendar day of `now`, in any status.
pub fn requests_on_day(existing: &[Withdrawal], user_id: &str, now: i64) -> usize {
    let today = calendar_day(now);
    existing
        .iter()
        .filter(|w| w.user_id == user_id && calendar_day(w.requested_at) == today)
        .count()
}

/// Validates and reserves the funds; the debit happens before approval.
pub fn request_withdrawal(
    user: User,
    existing: &[Withdrawal],
    request: NewWithdrawal,
    id: String,
    now: i64,
) -> Result<(User, Withdrawal), EconomyError> {
    user.ensure_active()?;
    let config = user.tier_config();

    if request.amount < config.min_withdrawal {
        return Err(EconomyError::BelowMinimum {
            amount: request.amount,
            minimum: config.min_withdrawal,
        });
    }

    if requests_on_day(existing, &user.id, now) >= config.daily_withdrawals as usize {
        return Err(EconomyError::DailyQuotaExceeded {
            limit: config.daily_withdrawals,
        });
    }

    let user = user.debit(request.amount, now)?;
    let withdrawal = Withdrawal {
        id,
        user_id: user.id.clone(),
        amount: request.amount,
        status: RequestStatus::Pending,
        method: request.method,
        details: request.details,
        requested_at: now,
        processed_at: None,
    };

    Ok((user, withdrawal))
}

impl Withdrawal {
    pub fn decide(mut self, to: RequestStatus, now: i64) -> Result<Self, EconomyError> {
        self.status = self.status.transition(to)?;
        self.processed_at = Some(now);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tiers::Tier;
    use crate::models::users::NewUser;
    use crate::utils::time::{MS_PER_DAY, MS_PER_HOUR};
    use serde_json::json;

    // 2024-03-02T00:00:00Z
    const MIDNIGHT: i64 = 1_709_337_600_000;

    fn user(coins: u64) -> User {
        let identity = NewUser {
            id: "u1".to_string(),
            username: None,
            first_name: None,
            last_name: None,
            referral_code: None,
        };
        User::new(&identity, 1.0, 0).credit_earnings(coins, 0)
    }

    fn new_withdrawal(amount: u64) -> NewWithdrawal {
        NewWithdrawal {
            user_id: "u1".to_string(),
            amount,
            method: "ton".to_string(),
            details: json!({"wallet": "UQ-test"}),
        }
    }

    #[test]
    fn test_below_minimum_rejected() {
        let error =
            request_withdrawal(user(5_000), &[], new_withdrawal(999), "w1".into(), MIDNIGHT)
                .unwrap_err();
        assert_eq!(
            error,
            EconomyError::BelowMinimum {
                amount: 999,
                minimum: 1_000
            }
        );
    }

    #[test]
    fn test_insufficient_balance_rejected() {
        let error =
            request_withdrawal(user(1_500), &[], new_withdrawal(2_000), "w1".into(), MIDNIGHT)
                .unwrap_err();
        assert!(matches!(error, EconomyError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_free_tier_one_per_day() {
        let (user, first) =
            request_withdrawal(user(5_000), &[], new_withdrawal(1_000), "w1".into(), MIDNIGHT)
                .unwrap();
        assert_eq!(user.coins, 4_000);
        assert_eq!(first.status, RequestStatus::Pending);

        let existing = vec![first];
        let error = request_withdrawal(
            user.clone(),
            &existing,
            new_withdrawal(1_000),
            "w2".into(),
            MIDNIGHT + 5 * MS_PER_HOUR,
        )
        .unwrap_err();
        assert_eq!(error, EconomyError::DailyQuotaExceeded { limit: 1 });
        assert_eq!(user.coins, 4_000);

        // next calendar day, even though less than 24h later
        let (user, _) = request_withdrawal(
            user,
            &existing,
            new_withdrawal(1_000),
            "w3".into(),
            MIDNIGHT + MS_PER_DAY,
        )
        .unwrap();
        assert_eq!(user.coins, 3_000);
    }

    #[test]
    fn test_vip_tier_limits() {
        let mut vip = user(1_000);
        vip.tier = Tier::Bronze;
        let (_, withdrawal) =
            request_withdrawal(vip, &[], new_withdrawal(500), "w1".into(), MIDNIGHT).unwrap();
        assert_eq!(withdrawal.amount, 500);
    }

    #[test]
    fn test_decision_is_final() {
        let (_, withdrawal) =
            request_withdrawal(user(1_000), &[], new_withdrawal(1_000), "w1".into(), MIDNIGHT)
                .unwrap();
        let approved = withdrawal.decide(RequestStatus::Approved, MIDNIGHT + 1).unwrap();
        assert_eq!(approved.processed_at, Some(MIDNIGHT + 1));

        let error = approved.decide(RequestStatus::Rejected, MIDNIGHT + 2).unwrap_err();
        assert_eq!(
            error,
            EconomyError::InvalidTransition {
                from: RequestStatus::Approved,
                to: RequestStatus::Rejected
            }
        );
    }
}
